//! Error types shared by the peer and the node master.

use thiserror::Error;

/// Violations of the wire protocol.
///
/// The registration variants render as the exact reason carried in an
/// `ERROR <reason>` frame, so the node master can reply with `to_string()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Nickname or port number too long, please try again.")]
    RegistrationTooLong,

    #[error("Expected nickname and port number.")]
    MissingFields,

    #[error("Port number must be numeric.")]
    InvalidPort(String),

    #[error("Nickname must not contain ';', '&' or spaces.")]
    InvalidNickname(String),

    #[error("Nickname already taken, please try a different one.")]
    NicknameTaken,

    #[error("Message is {len} bytes, the maximum is 140.")]
    MessageTooLong { len: usize },

    #[error("Message is empty.")]
    EmptyMessage,

    #[error("Malformed peer record `{0}`")]
    MalformedRecord(String),

    #[error("Malformed registry event `{0}`")]
    MalformedEvent(String),

    #[error("Invalid chat handshake: nickname length {0} (allowed 1..=40)")]
    InvalidHandshake(usize),
}

/// Main error type for rendezvous chat operations
#[derive(Error, Debug)]
pub enum Error {
    /// The remote side broke the protocol, or we refused to send something.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reset, write failure or any other socket-level problem.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The node master refused the registration.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection closed")]
    Closed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
