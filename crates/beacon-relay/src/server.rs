//! `RelayServer`: owns the registry and the shutdown coordinator, starts the
//! listener and the status reporter.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::errors::Result;
use crate::listener;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;
use crate::status::run_status_reporter;

/// The broadcast relay.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RelayServer {
    /// Create a new server. Nothing is bound until [`RelayServer::listen`].
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(config.queue_capacity)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            config,
        }
    }

    /// Bind the configured address and spawn the accept loop.
    ///
    /// Returns the bound address (useful with port `0`) and the listener task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let tcp = listener::bind(self.config.bind_addr()).await?;
        let addr = tcp.local_addr()?;
        let handle = self.shutdown.spawn(listener::accept_loop(
            tcp,
            Arc::clone(&self.registry),
            self.config.max_frame_size,
            self.config.accept_backoff(),
            Arc::clone(&self.shutdown),
        ));
        Ok((addr, handle))
    }

    /// Spawn the periodic status reporter, unless its interval is disabled.
    pub fn spawn_status_reporter(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.status_interval()?;
        Some(self.shutdown.spawn(run_status_reporter(
            Arc::clone(&self.registry),
            interval,
            self.shutdown.token(),
        )))
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}
