pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod persistence;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod shutdown;

pub use error::{GearmanError, Result};
