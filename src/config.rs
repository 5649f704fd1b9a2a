use std::net::SocketAddr;

use crate::persistence::exceptions::DEFAULT_EXCEPTION_CAPACITY;
use crate::scheduler::lock::DEFAULT_STRIPES;

/// Gearman's registered port.
pub const DEFAULT_PORT: u16 = 4730;

/// Which durable store backs the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceKind {
    /// Jobs live only in memory; nothing to restore after a restart.
    #[default]
    None,
    /// In-process record store behind the persistence trait.
    Memory,
}

/// Settings for the scheduling engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix of every job handle.
    pub hostname: String,
    /// Per-function queue bound. `None` means unbounded.
    pub max_queue_size: Option<usize>,
    /// How many WORK_EXCEPTION reports to keep. Zero disables storage.
    pub exception_store_capacity: usize,
    /// Stripe count for the keyed locks.
    pub lock_stripes: usize,
    pub persistence: PersistenceKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            max_queue_size: None,
            exception_store_capacity: DEFAULT_EXCEPTION_CAPACITY,
            lock_stripes: DEFAULT_STRIPES,
            persistence: PersistenceKind::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.engine.hostname = hostname.into();
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: Option<usize>) -> Self {
        self.engine.max_queue_size = max_queue_size;
        self
    }

    pub fn with_exception_capacity(mut self, capacity: usize) -> Self {
        self.engine.exception_store_capacity = capacity;
        self
    }

    pub fn with_persistence(mut self, persistence: PersistenceKind) -> Self {
        self.engine.persistence = persistence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default() {
        let cfg = EngineConfig::default();
        assert!(!cfg.hostname.is_empty());
        assert!(cfg.max_queue_size.is_none());
        assert_eq!(cfg.exception_store_capacity, 1000);
        assert_eq!(cfg.lock_stripes, 64);
        assert_eq!(cfg.persistence, PersistenceKind::None);
    }

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:4730");
    }

    #[test]
    fn server_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = ServerConfig::new(addr);
        assert_eq!(cfg.listen_addr, addr);
        assert!(cfg.engine.max_queue_size.is_none());
    }

    #[test]
    fn server_config_builders() {
        let cfg = ServerConfig::default()
            .with_hostname("broker-7")
            .with_max_queue_size(Some(50))
            .with_exception_capacity(10)
            .with_persistence(PersistenceKind::Memory);
        assert_eq!(cfg.engine.hostname, "broker-7");
        assert_eq!(cfg.engine.max_queue_size, Some(50));
        assert_eq!(cfg.engine.exception_store_capacity, 10);
        assert_eq!(cfg.engine.persistence, PersistenceKind::Memory);
    }
}
