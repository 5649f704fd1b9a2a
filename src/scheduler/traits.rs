//! Callbacks the engine uses to reach connected peers.
//!
//! The engine never blocks on a peer: implementations hand packets to a
//! connection's outbound channel and report failure through the `Result`.

use crate::error::Result;
use crate::scheduler::job::{Job, JobKey, JobStatus};

pub trait EngineWorker: Send + Sync {
    fn id(&self) -> u64;

    /// Registered functions, in registration order.
    fn abilities(&self) -> Vec<String>;

    /// Nudge a sleeping worker to come back and ask for work.
    fn wake_up(&self);

    fn mark_asleep(&self);

    fn send_job_assignment(&self, job: &Job, with_unique_id: bool) -> Result<()>;

    fn send_no_job(&self) -> Result<()>;
}

pub trait EngineClient: Send + Sync {
    fn id(&self) -> u64;

    /// Most recent job this client submitted or attached to.
    fn current_job(&self) -> Option<JobKey>;

    fn set_current_job(&self, job: Option<JobKey>);

    fn send_work_results(&self, job_handle: &str, data: &[u8]) -> Result<()>;

    fn send_work_data(&self, job_handle: &str, data: &[u8]) -> Result<()>;

    fn send_work_warning(&self, job_handle: &str, data: &[u8]) -> Result<()>;

    fn send_work_exception(&self, job_handle: &str, data: &[u8]) -> Result<()>;

    fn send_work_fail(&self, job_handle: &str) -> Result<()>;

    fn send_work_status(&self, status: &JobStatus) -> Result<()>;
}
