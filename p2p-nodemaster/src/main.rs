use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use p2p_nodemaster::config::{DEFAULT_BIND_HOST, NodeConfig};
use p2p_nodemaster::network::RendezvousNode;
use rendezvous_chat::common::protocol::DEFAULT_NODEMASTER_PORT;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "p2p-nodemaster",
    version,
    about = "Rendezvous service for rendezvous_chat peers"
)]
struct Cli {
    /// Port peers register on
    #[arg(long, env = "NODEMASTER_PORT", default_value_t = DEFAULT_NODEMASTER_PORT)]
    port: u16,
    /// Interface to listen on
    #[arg(long, env = "NODEMASTER_HOST", default_value = DEFAULT_BIND_HOST)]
    host: String,
    /// Seconds of silence after which a peer is dropped
    #[arg(long, env = "NODEMASTER_IDLE_TIMEOUT", default_value_t = 30)]
    idle_timeout: u64,
}

impl Cli {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            host: self.host,
            port: self.port,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            ..NodeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    log::info!("Starting P2P Node Master (rendezvous service)...");

    let node = RendezvousNode::bind(cli.into_config()).await?;

    tokio::select! {
        result = node.run() => {
            if let Err(err) = result {
                log::error!("Node master error: {}", err);
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping node master...");
        }
    }

    log::info!(
        "Final statistics: {} peers online",
        node.registry().peer_count().await
    );

    Ok(())
}
