use thiserror::Error;

use crate::scheduler::JobState;

#[derive(Error, Debug)]
pub enum GearmanError {
    #[error("Illegal job state transition from {from} to {to}")]
    IllegalStateTransition { from: JobState, to: JobState },

    #[error("Queue for {function} is full (capacity {capacity})")]
    QueueFull { function: String, capacity: usize },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GearmanError>;
