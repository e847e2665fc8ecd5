use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::protocol::DEFAULT_NODEMASTER_PORT;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/peer.json";
pub const DEFAULT_CHAT_PORT: u16 = 40000;
pub const DEFAULT_SERVER_HOST: &str = "localhost";

// 1-16 ASCII letters, digits or underscores.
static NICKNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{1,16}$").unwrap_or_else(|err| panic!("invalid nickname pattern: {err}"))
});

/// Timers of the peer side. Not part of the JSON file; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long to wait for the node master's reply to a registration, and
    /// for an inbound chat handshake.
    pub response_timeout: Duration,
    pub heartbeat_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Time the node master gets to process `/quit` before we hang up.
    pub disconnect_grace: Duration,
    /// A chat partner silent for this long (no text, no keep-alive) is gone.
    pub chat_idle_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(4),
            heartbeat_delay: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(3),
            disconnect_grace: Duration::from_millis(400),
            chat_idle_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nickname: String,
    /// Port of our own chat listener, announced to the node master.
    pub chat_port: u16,
    pub server_host: String,
    pub server_port: u16,
    #[serde(skip)]
    pub timing: Timing,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            chat_port: DEFAULT_CHAT_PORT,
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_NODEMASTER_PORT,
            timing: Timing::default(),
        }
    }
}

impl AppConfig {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn chat_bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.chat_port)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_user_nickname(&self.nickname) {
            return Err(Error::Config(format!(
                "nickname `{}` must be 1-16 letters, digits or underscores",
                self.nickname
            )));
        }
        if self.server_host.trim().is_empty() {
            return Err(Error::Config("server host must not be empty".into()));
        }
        Ok(())
    }
}

pub fn is_valid_user_nickname(nickname: &str) -> bool {
    NICKNAME_PATTERN.is_match(nickname)
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}
