use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

pub const DEFAULT_EXCEPTION_CAPACITY: usize = 1000;

/// A WORK_EXCEPTION report kept for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRecord {
    pub job_handle: String,
    pub unique_id: String,
    #[serde(skip)]
    pub job_data: Bytes,
    #[serde(skip)]
    pub exception_data: Bytes,
    pub recorded_at: DateTime<Utc>,
}

impl ExceptionRecord {
    pub fn exception_text(&self) -> String {
        String::from_utf8_lossy(&self.exception_data).into_owned()
    }
}

pub trait ExceptionStore: Send + Sync {
    fn store_exception(
        &self,
        job_handle: &str,
        unique_id: &str,
        job_data: Bytes,
        exception_data: Bytes,
    ) -> bool;

    /// Handles in the order their exceptions were recorded.
    fn failed_job_handles(&self) -> Vec<String>;

    /// One page of records, oldest first. Pages start at 1.
    fn exceptions(&self, page: usize, page_size: usize) -> Vec<ExceptionRecord>;

    fn count(&self) -> usize;
}

/// Ring of the newest `capacity` records. A capacity of zero stores nothing.
#[derive(Debug)]
pub struct MemoryExceptionStore {
    records: Mutex<VecDeque<ExceptionRecord>>,
    capacity: usize,
}

impl Default for MemoryExceptionStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXCEPTION_CAPACITY)
    }
}

impl MemoryExceptionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }
}

impl ExceptionStore for MemoryExceptionStore {
    fn store_exception(
        &self,
        job_handle: &str,
        unique_id: &str,
        job_data: Bytes,
        exception_data: Bytes,
    ) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let record = ExceptionRecord {
            job_handle: job_handle.to_string(),
            unique_id: unique_id.to_string(),
            job_data,
            exception_data,
            recorded_at: Utc::now(),
        };

        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        true
    }

    fn failed_job_handles(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| r.job_handle.clone())
            .collect()
    }

    fn exceptions(&self, page: usize, page_size: usize) -> Vec<ExceptionRecord> {
        let offset = page.saturating_sub(1) * page_size;
        self.records
            .lock()
            .iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.records.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(s: &MemoryExceptionStore, handle: &str) {
        s.store_exception(
            handle,
            "uid",
            Bytes::from_static(b"job"),
            Bytes::from_static(b"boom"),
        );
    }

    #[test]
    fn keeps_newest_entries() {
        let s = MemoryExceptionStore::new(2);
        store(&s, "h:1");
        store(&s, "h:2");
        store(&s, "h:3");
        assert_eq!(s.count(), 2);
        assert_eq!(s.failed_job_handles(), vec!["h:2", "h:3"]);
    }

    #[test]
    fn pages_are_one_based() {
        let s = MemoryExceptionStore::new(10);
        for i in 1..=5 {
            store(&s, &format!("h:{}", i));
        }
        let page = s.exceptions(2, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].job_handle, "h:3");
        assert_eq!(page[0].exception_text(), "boom");
        assert!(s.exceptions(4, 2).is_empty());
    }

    #[test]
    fn zero_capacity_disables_storage() {
        let s = MemoryExceptionStore::new(0);
        assert!(!s.store_exception("h:1", "u", Bytes::new(), Bytes::new()));
        assert_eq!(s.count(), 0);
    }
}
