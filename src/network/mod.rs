pub mod chat;
pub mod client;
pub mod listener;
pub mod transport;

pub use chat::ChatSession;
pub use client::RegistryClient;
pub use listener::ChatListener;
pub use transport::{FrameReader, FrameWriter, FramedChannel};
