//! Peer side of the rendezvous chat: wire protocol, registry client, direct
//! chat sessions and the console front-end.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod ui;

pub use error::{Error, ProtocolError, Result};
