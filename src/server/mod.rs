//! TCP front end: one task per connection, all sharing one `JobManager`.

pub mod connection;
pub mod peer;

pub use connection::{handle_connection, Session};
pub use peer::{NetworkClient, NetworkWorker, Outbound};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::JobManager;

pub struct GearmanServer {
    addr: SocketAddr,
    manager: Arc<JobManager>,
}

impl GearmanServer {
    pub fn new(addr: SocketAddr, manager: Arc<JobManager>) -> Self {
        Self { addr, manager }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        run(listener, self.manager, shutdown).await
    }
}

/// Accept connections until `shutdown` fires.
pub async fn run(
    listener: TcpListener,
    manager: Arc<JobManager>,
    shutdown: CancellationToken,
) -> Result<()> {
    let next_id = AtomicU64::new(1);
    tracing::info!(addr = %listener.local_addr()?, "Starting Gearman server");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Gearman server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(connection = id, peer = %peer, "Accepted connection");
                tokio::spawn(handle_connection(
                    id,
                    stream,
                    peer,
                    manager.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}
