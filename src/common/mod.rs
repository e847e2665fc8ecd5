pub mod commands;
pub mod events;
pub mod protocol;
pub mod types;

pub use commands::UserCommand;
pub use events::NetworkEvent;
pub use protocol::RegistryEvent;
pub use types::{ChatLine, PeerRecord};
