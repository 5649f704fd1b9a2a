use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{GearmanError, Result};
use crate::scheduler::job::{now_epoch, Job, JobKey, JobPriority};

/// Lightweight queue entry; the full job lives in the manager's job table
/// or in the persistence engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueuedJob {
    pub function_name: String,
    pub unique_id: String,
    pub priority: JobPriority,
    pub time_to_run: i64,
}

impl QueuedJob {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.function_name.clone(), self.unique_id.clone())
    }

    pub fn is_ready_at(&self, now: i64) -> bool {
        self.time_to_run <= now
    }
}

impl From<&Job> for QueuedJob {
    fn from(job: &Job) -> Self {
        Self {
            function_name: job.function_name.clone(),
            unique_id: job.unique_id.clone(),
            priority: job.priority,
            time_to_run: job.time_to_run,
        }
    }
}

/// Per-function queue with three priority lanes.
///
/// HIGH and LOW are strict FIFO. NORMAL is scanned for the first entry
/// whose `time_to_run` has passed, so epoch jobs wait in place without
/// blocking ready work behind them. A unique ID appears at most once across
/// all three lanes; membership is only changed while holding the lock of the
/// lane the entry lives in.
#[derive(Debug)]
pub struct PriorityJobQueue {
    name: String,
    high: Mutex<VecDeque<QueuedJob>>,
    normal: Mutex<VecDeque<QueuedJob>>,
    low: Mutex<VecDeque<QueuedJob>>,
    members: DashSet<String>,
    size: AtomicUsize,
    capacity: Option<usize>,
}

impl PriorityJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, None)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            high: Mutex::new(VecDeque::new()),
            normal: Mutex::new(VecDeque::new()),
            low: Mutex::new(VecDeque::new()),
            members: DashSet::new(),
            size: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn lane(&self, priority: JobPriority) -> &Mutex<VecDeque<QueuedJob>> {
        match priority {
            JobPriority::High => &self.high,
            JobPriority::Normal => &self.normal,
            JobPriority::Low => &self.low,
        }
    }

    /// Append to the lane for the job's priority.
    ///
    /// Returns `Ok(false)` if the unique ID is already queued, and
    /// `QueueFull` when a capacity is set and reached.
    pub fn enqueue(&self, job: QueuedJob) -> Result<bool> {
        self.insert(job, true)
    }

    /// Like [`enqueue`](Self::enqueue) but ignores the capacity bound. Used for
    /// work that was already admitted once: re-enqueues and restored jobs.
    pub fn restore(&self, job: QueuedJob) -> bool {
        matches!(self.insert(job, false), Ok(true))
    }

    fn insert(&self, job: QueuedJob, bounded: bool) -> Result<bool> {
        let mut lane = self.lane(job.priority).lock();

        if let Some(capacity) = self.capacity.filter(|_| bounded) {
            if self.size.load(Ordering::Acquire) >= capacity {
                return Err(GearmanError::QueueFull {
                    function: self.name.clone(),
                    capacity,
                });
            }
        }

        if !self.members.insert(job.unique_id.clone()) {
            return Ok(false);
        }

        lane.push_back(job);
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    /// Next runnable entry as of now.
    pub fn poll(&self) -> Option<QueuedJob> {
        self.poll_at(now_epoch())
    }

    /// Next runnable entry: HIGH head, else the first ready NORMAL entry,
    /// else LOW head.
    pub fn poll_at(&self, now: i64) -> Option<QueuedJob> {
        if let Some(job) = self.pop_front(&self.high) {
            return Some(job);
        }

        {
            let mut normal = self.normal.lock();
            if let Some(pos) = normal.iter().position(|j| j.is_ready_at(now)) {
                if let Some(job) = normal.remove(pos) {
                    self.forget(&job.unique_id);
                    return Some(job);
                }
            }
        }

        self.pop_front(&self.low)
    }

    fn pop_front(&self, lane: &Mutex<VecDeque<QueuedJob>>) -> Option<QueuedJob> {
        let mut lane = lane.lock();
        let job = lane.pop_front()?;
        self.forget(&job.unique_id);
        Some(job)
    }

    fn forget(&self, unique_id: &str) {
        self.members.remove(unique_id);
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    /// Remove the entry for `unique_id` from whichever lane holds it.
    pub fn remove(&self, unique_id: &str) -> bool {
        for priority in JobPriority::ALL {
            let mut lane = self.lane(priority).lock();
            if let Some(pos) = lane.iter().position(|j| j.unique_id == unique_id) {
                lane.remove(pos);
                self.forget(unique_id);
                return true;
            }
        }
        false
    }

    pub fn unique_id_in_use(&self, unique_id: &str) -> bool {
        self.members.contains(unique_id)
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn size_of(&self, priority: JobPriority) -> usize {
        self.lane(priority).lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True if a poll at `now` would return something.
    pub fn has_ready_job(&self, now: i64) -> bool {
        if !self.high.lock().is_empty() {
            return true;
        }
        if self.normal.lock().iter().any(|j| j.is_ready_at(now)) {
            return true;
        }
        !self.low.lock().is_empty()
    }

    /// Snapshot of every entry, HIGH then NORMAL then LOW.
    pub fn all_jobs(&self) -> Vec<QueuedJob> {
        JobPriority::ALL
            .iter()
            .flat_map(|p| self.lane(*p).lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// NORMAL entries bucketed by whole hours until they become runnable.
    /// Bucket 0 is always present and also holds already-ready entries.
    pub fn future_counts(&self, now: i64) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        counts.insert(0, 0);
        for job in self.normal.lock().iter() {
            let delta = job.time_to_run - now;
            let hours = if delta > 0 { delta / 3600 } else { 0 };
            *counts.entry(hours).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::EPOCH_IMMEDIATE;

    fn entry(uid: &str, priority: JobPriority, time_to_run: i64) -> QueuedJob {
        QueuedJob {
            function_name: "reverse".to_string(),
            unique_id: uid.to_string(),
            priority,
            time_to_run,
        }
    }

    #[test]
    fn rejects_duplicate_unique_id_across_lanes() {
        let queue = PriorityJobQueue::new("reverse");
        assert!(queue
            .enqueue(entry("a", JobPriority::Low, EPOCH_IMMEDIATE))
            .unwrap());
        assert!(!queue
            .enqueue(entry("a", JobPriority::High, EPOCH_IMMEDIATE))
            .unwrap());
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let queue = PriorityJobQueue::with_capacity("reverse", Some(1));
        queue
            .enqueue(entry("a", JobPriority::Normal, EPOCH_IMMEDIATE))
            .unwrap();
        let err = queue
            .enqueue(entry("b", JobPriority::Normal, EPOCH_IMMEDIATE))
            .unwrap_err();
        assert!(matches!(err, GearmanError::QueueFull { capacity: 1, .. }));

        assert!(queue.restore(entry("c", JobPriority::Low, EPOCH_IMMEDIATE)));
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn remove_frees_unique_id() {
        let queue = PriorityJobQueue::new("reverse");
        queue
            .enqueue(entry("a", JobPriority::Normal, EPOCH_IMMEDIATE))
            .unwrap();
        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert!(!queue.unique_id_in_use("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn future_counts_buckets_by_hour() {
        let queue = PriorityJobQueue::new("reverse");
        let now = 10_000;
        queue
            .enqueue(entry("ready", JobPriority::Normal, now - 5))
            .unwrap();
        queue
            .enqueue(entry("soon", JobPriority::Normal, now + 60))
            .unwrap();
        queue
            .enqueue(entry("later", JobPriority::Normal, now + 2 * 3600 + 1))
            .unwrap();

        let counts = queue.future_counts(now);
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&2), Some(&1));
    }

    #[test]
    fn empty_queue_reports_zero_bucket() {
        let queue = PriorityJobQueue::new("reverse");
        let counts = queue.future_counts(0);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&0), Some(&0));
    }
}
