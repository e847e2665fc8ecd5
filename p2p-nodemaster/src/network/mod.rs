pub mod broadcast;
pub mod node;
pub mod registry;
pub mod session;

pub use broadcast::{Broadcaster, Delivery, SessionHandle, SessionId};
pub use node::RendezvousNode;
pub use registry::PresenceRegistry;
pub use session::{RegistrySession, SessionState};
