use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, PersistenceKind, ServerConfig};
use crate::error::Result;
use crate::persistence::{
    MemoryExceptionStore, MemoryPersistenceEngine, NoopPersistenceEngine, PersistenceEngine,
};
use crate::scheduler::JobManager;
use crate::server::{self, GearmanServer};

/// Main broker process: one engine behind one listener.
pub struct Node {
    pub config: ServerConfig,
    pub manager: Arc<JobManager>,
}

impl Node {
    pub fn new(config: ServerConfig) -> Self {
        let manager = Arc::new(Self::build_manager(&config.engine));
        Self { config, manager }
    }

    /// Engine wired to the configured persistence and exception stores.
    pub fn build_manager(config: &EngineConfig) -> JobManager {
        let persistence: Arc<dyn PersistenceEngine> = match config.persistence {
            PersistenceKind::None => Arc::new(NoopPersistenceEngine),
            PersistenceKind::Memory => Arc::new(MemoryPersistenceEngine::new()),
        };
        let exceptions = Arc::new(MemoryExceptionStore::new(config.exception_store_capacity));
        JobManager::new(config, persistence, exceptions)
    }

    /// Run the node.
    ///
    /// Rebuilds queues from persistence, then serves Gearman connections on
    /// the configured address until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted jobs cannot be read or the listener
    /// cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.restore()?;
        tracing::info!(
            addr = %self.config.listen_addr,
            hostname = %self.config.engine.hostname,
            "Starting node"
        );
        GearmanServer::new(self.config.listen_addr, self.manager)
            .run(shutdown)
            .await
    }

    /// Like [`run`](Self::run) on an already bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        self.restore()?;
        server::run(listener, self.manager, shutdown).await
    }

    fn restore(&self) -> Result<()> {
        if self.config.engine.persistence != PersistenceKind::None {
            self.manager.restore_from_persistence()?;
        }
        Ok(())
    }
}
