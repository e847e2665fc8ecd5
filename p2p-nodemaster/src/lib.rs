//! Rendezvous side of the chat: tracks who is online and tells everyone when
//! that changes.

pub mod config;
pub mod network;

pub use config::NodeConfig;
pub use network::RendezvousNode;
