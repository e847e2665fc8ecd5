use std::net::SocketAddr;
use std::sync::Arc;

use rendezvous_chat::error::{Error, Result};
use tokio::net::TcpListener;
use tokio::time::interval;

use crate::config::NodeConfig;

use super::registry::PresenceRegistry;
use super::session::RegistrySession;

/// The rendezvous service: owns the presence registry and runs one
/// [`RegistrySession`] per accepted connection.
pub struct RendezvousNode {
    listener: TcpListener,
    registry: Arc<PresenceRegistry>,
    config: NodeConfig,
}

impl RendezvousNode {
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|err| Error::Config(format!("cannot listen on {address}: {err}")))?;
        log::info!("Node master set up at {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: Arc::new(PresenceRegistry::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<PresenceRegistry> {
        self.registry.clone()
    }

    /// Accepts peers forever. A failing connection never stops the loop.
    pub async fn run(&self) -> Result<()> {
        let mut stats_interval = interval(self.config.stats_interval);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        log::info!("Accepted connection from {peer_addr}");
                        tokio::spawn(RegistrySession::run(
                            stream,
                            peer_addr,
                            self.registry.clone(),
                            self.config.idle_timeout,
                        ));
                    }
                    Err(err) => log::warn!("Failed to accept connection: {err}"),
                },
                _ = stats_interval.tick() => {
                    log::info!(
                        "Statistics: {} peers online, {} sessions attached",
                        self.registry.peer_count().await,
                        self.registry.session_count().await
                    );
                }
            }
        }
    }
}
