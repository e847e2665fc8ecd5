use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::common::protocol::{FIELD_SEPARATOR, is_valid_nickname};
use crate::error::ProtocolError;

/// An online peer as known to the node master: who it is and where its chat
/// listener can be reached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerRecord {
    pub nickname: String,
    pub host: String,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(nickname: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            nickname: nickname.into(),
            host: host.into(),
            port,
        }
    }

    /// `nickname;host;port`
    pub fn to_wire(&self) -> String {
        format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.nickname, self.host, self.port
        )
    }

    pub fn from_wire(entry: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedRecord(entry.to_string());

        let mut fields = entry.split(FIELD_SEPARATOR);
        let (Some(nickname), Some(host), Some(port), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };

        if !is_valid_nickname(nickname) || host.is_empty() {
            return Err(malformed());
        }
        let port = port.trim().parse::<u16>().map_err(|_| malformed())?;

        Ok(Self::new(nickname, host, port))
    }

    /// `host:port` of the peer's chat listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nickname)
    }
}

/// A line of conversation received from a chat partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub from: String,
    pub text: String,
    pub timestamp: i64,
}

impl ChatLine {
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            text: text.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}
