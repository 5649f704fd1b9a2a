//! Durable job storage behind a trait.
//!
//! The engine writes every stored job, deletes it on completion, and only
//! reads records back at startup or when a queue entry has no in-memory job.

pub mod exceptions;
pub mod memory;

pub use exceptions::{ExceptionRecord, ExceptionStore, MemoryExceptionStore};
pub use memory::{MemoryPersistenceEngine, NoopPersistenceEngine};

use crate::error::Result;
use crate::scheduler::job::Job;
use crate::scheduler::queue::QueuedJob;

pub trait PersistenceEngine: Send + Sync {
    /// Short name used in logs.
    fn identifier(&self) -> &str;

    fn write(&self, job: &Job) -> Result<()>;

    fn delete(&self, function_name: &str, unique_id: &str) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    fn find_job(&self, function_name: &str, unique_id: &str) -> Result<Option<Job>>;

    /// Descriptors for every stored job, used to rebuild queues on restart.
    fn read_all(&self) -> Result<Vec<QueuedJob>>;

    fn all_for_function(&self, function_name: &str) -> Result<Vec<QueuedJob>>;
}
