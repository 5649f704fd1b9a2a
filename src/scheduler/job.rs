use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GearmanError, Result};

/// `time_to_run` value for jobs that may run as soon as a worker asks.
pub const EPOCH_IMMEDIATE: i64 = -1;

/// Current wall-clock time in epoch seconds.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Normal, JobPriority::Low];
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Working,
    Complete,
    /// Never stored on a job; reported for handles that are not tracked.
    Unknown,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Working => write!(f, "working"),
            JobState::Complete => write!(f, "complete"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// What to do with a job whose worker went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Reenqueue,
    MarkComplete,
    DoNothing,
}

/// Deduplication key: unique IDs are only unique within a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub function_name: String,
    pub unique_id: String,
}

impl JobKey {
    pub fn new(function_name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            unique_id: unique_id.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.function_name, self.unique_id)
    }
}

/// Point-in-time progress report for a job handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_handle: String,
    pub state: JobState,
    pub numerator: u32,
    pub denominator: u32,
}

impl JobStatus {
    pub fn unknown(job_handle: impl Into<String>) -> Self {
        Self {
            job_handle: job_handle.into(),
            state: JobState::Unknown,
            numerator: 0,
            denominator: 0,
        }
    }

    /// True while the broker still tracks the handle.
    pub fn is_known(&self) -> bool {
        self.state != JobState::Unknown
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Working
    }

    /// True once a worker has reported a non-zero denominator.
    pub fn has_progress(&self) -> bool {
        self.denominator != 0
    }
}

/// A unit of work submitted by a client.
///
/// Identity and payload are plain fields; the run state and progress only
/// change through the transition methods so a completed job stays frozen.
#[derive(Debug, Clone)]
pub struct Job {
    pub function_name: String,
    pub unique_id: String,
    /// Empty until the broker stores the job.
    pub job_handle: String,
    pub data: Bytes,
    pub priority: JobPriority,
    pub background: bool,
    /// Epoch seconds, or [`EPOCH_IMMEDIATE`].
    pub time_to_run: i64,
    pub created_at: DateTime<Utc>,
    state: JobState,
    numerator: u32,
    denominator: u32,
}

impl Job {
    pub fn new(
        function_name: impl Into<String>,
        unique_id: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            unique_id: unique_id.into(),
            job_handle: String::new(),
            data: data.into(),
            priority: JobPriority::Normal,
            background: false,
            time_to_run: EPOCH_IMMEDIATE,
            created_at: Utc::now(),
            state: JobState::Queued,
            numerator: 0,
            denominator: 0,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn with_time_to_run(mut self, time_to_run: i64) -> Self {
        self.time_to_run = time_to_run;
        self
    }

    pub fn with_handle(mut self, job_handle: impl Into<String>) -> Self {
        self.job_handle = job_handle.into();
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.function_name.clone(), self.unique_id.clone())
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_handle: self.job_handle.clone(),
            state: self.state,
            numerator: self.numerator,
            denominator: self.denominator,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Working
    }

    pub fn is_complete(&self) -> bool {
        self.state == JobState::Complete
    }

    pub fn is_ready_at(&self, now: i64) -> bool {
        self.time_to_run <= now
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready_at(now_epoch())
    }

    /// QUEUED -> WORKING. Any other starting state is rejected.
    pub fn mark_working(&mut self) -> Result<()> {
        match self.state {
            JobState::Queued => {
                self.state = JobState::Working;
                Ok(())
            }
            from => Err(GearmanError::IllegalStateTransition {
                from,
                to: JobState::Working,
            }),
        }
    }

    /// WORKING -> QUEUED. Returns `Ok(false)` when the job was already
    /// queued and nothing needs to be re-inserted.
    pub fn requeue(&mut self) -> Result<bool> {
        match self.state {
            JobState::Working => {
                self.state = JobState::Queued;
                Ok(true)
            }
            JobState::Queued => Ok(false),
            from => Err(GearmanError::IllegalStateTransition {
                from,
                to: JobState::Queued,
            }),
        }
    }

    /// Terminal transition; repeated calls are no-ops.
    pub fn complete(&mut self) {
        self.state = JobState::Complete;
    }

    /// Records worker progress. Ignored once the job is complete.
    pub fn set_progress(&mut self, numerator: u32, denominator: u32) -> bool {
        if self.is_complete() {
            return false;
        }
        self.numerator = numerator;
        self.denominator = denominator;
        true
    }
}

/// Two submissions are the same job when function, unique ID, payload,
/// priority and background flag all match; handle and run state are ignored.
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.function_name == other.function_name
            && self.unique_id == other.unique_id
            && self.data == other.data
            && self.priority == other.priority
            && self.background == other.background
    }
}

impl Eq for Job {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_defaults() {
        let job = Job::new("reverse", "abc", "payload");
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.priority, JobPriority::Normal);
        assert!(!job.background);
        assert_eq!(job.time_to_run, EPOCH_IMMEDIATE);
        assert!(job.job_handle.is_empty());
        assert!(job.is_ready());
    }

    #[test]
    fn state_machine_happy_path() {
        let mut job = Job::new("reverse", "abc", "payload");
        job.mark_working().unwrap();
        assert!(job.is_running());
        job.complete();
        assert!(job.is_complete());
        job.complete();
        assert!(job.is_complete());
    }

    #[test]
    fn requeue_transitions() {
        let mut job = Job::new("reverse", "abc", "payload");
        assert!(!job.requeue().unwrap());

        job.mark_working().unwrap();
        assert!(job.requeue().unwrap());
        assert_eq!(job.state(), JobState::Queued);

        job.complete();
        let err = job.requeue().unwrap_err();
        assert!(matches!(
            err,
            GearmanError::IllegalStateTransition {
                from: JobState::Complete,
                to: JobState::Queued
            }
        ));
    }

    #[test]
    fn cannot_start_twice() {
        let mut job = Job::new("reverse", "abc", "payload");
        job.mark_working().unwrap();
        assert!(job.mark_working().is_err());
    }

    #[test]
    fn progress_frozen_after_completion() {
        let mut job = Job::new("reverse", "abc", "payload");
        assert!(job.set_progress(1, 4));
        job.complete();
        assert!(!job.set_progress(3, 4));
        assert_eq!(job.numerator(), 1);
        assert_eq!(job.denominator(), 4);
    }

    #[test]
    fn equality_ignores_handle_and_state() {
        let a = Job::new("reverse", "abc", "payload").with_handle("host:1");
        let mut b = Job::new("reverse", "abc", "payload");
        b.mark_working().unwrap();
        assert_eq!(a, b);

        let c = Job::new("reverse", "abc", "other");
        assert_ne!(a, c);
    }

    #[test]
    fn epoch_readiness() {
        let job = Job::new("reverse", "abc", "x").with_time_to_run(1_000);
        assert!(!job.is_ready_at(999));
        assert!(job.is_ready_at(1_000));
    }

    #[test]
    fn unknown_status() {
        let status = JobStatus::unknown("host:9");
        assert!(!status.is_known());
        assert!(!status.is_running());
        assert!(!status.has_progress());
    }
}
