pub mod handle;
pub mod job;
pub mod lock;
pub mod manager;
pub mod queue;
pub mod traits;
pub mod worker_pool;

pub use job::{Job, JobAction, JobKey, JobPriority, JobState, JobStatus, EPOCH_IMMEDIATE};
pub use manager::JobManager;
pub use queue::{PriorityJobQueue, QueuedJob};
pub use traits::{EngineClient, EngineWorker};
pub use worker_pool::WorkerPool;
