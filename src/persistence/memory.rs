use dashmap::DashMap;

use crate::error::Result;
use crate::persistence::PersistenceEngine;
use crate::scheduler::job::{Job, JobKey};
use crate::scheduler::queue::QueuedJob;

/// Keeps job records in a concurrent map. Survives manager rebuilds within
/// one process, which is what the restore path and tests need.
#[derive(Debug, Default)]
pub struct MemoryPersistenceEngine {
    jobs: DashMap<JobKey, Job>,
}

impl MemoryPersistenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl PersistenceEngine for MemoryPersistenceEngine {
    fn identifier(&self) -> &str {
        "memory"
    }

    fn write(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.key(), job.clone());
        Ok(())
    }

    fn delete(&self, function_name: &str, unique_id: &str) -> Result<()> {
        self.jobs.remove(&JobKey::new(function_name, unique_id));
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.jobs.clear();
        Ok(())
    }

    fn find_job(&self, function_name: &str, unique_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .get(&JobKey::new(function_name, unique_id))
            .map(|entry| entry.value().clone()))
    }

    fn read_all(&self) -> Result<Vec<QueuedJob>> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.iter().map(QueuedJob::from).collect())
    }

    fn all_for_function(&self, function_name: &str) -> Result<Vec<QueuedJob>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|j| j.function_name == function_name)
            .collect())
    }
}

/// Stores nothing. The default when durability is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistenceEngine;

impl PersistenceEngine for NoopPersistenceEngine {
    fn identifier(&self) -> &str {
        "none"
    }

    fn write(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _function_name: &str, _unique_id: &str) -> Result<()> {
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        Ok(())
    }

    fn find_job(&self, _function_name: &str, _unique_id: &str) -> Result<Option<Job>> {
        Ok(None)
    }

    fn read_all(&self) -> Result<Vec<QueuedJob>> {
        Ok(Vec::new())
    }

    fn all_for_function(&self, _function_name: &str) -> Result<Vec<QueuedJob>> {
        Ok(Vec::new())
    }
}
