use std::time::Duration;

use rendezvous_chat::common::protocol::DEFAULT_NODEMASTER_PORT;

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// A registered peer silent for this long (heartbeats included) is
    /// dropped.
    pub idle_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_NODEMASTER_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

impl NodeConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
