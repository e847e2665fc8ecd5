use crate::common::types::{ChatLine, PeerRecord};

/// Sự kiện từ tầng mạng gửi lên UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The node master announced a peer.
    PeerOnline(PeerRecord),
    /// The node master announced that a peer left.
    PeerOffline(String),
    /// Heartbeat to the node master failed; the roster is stale.
    RegistryLost,
    /// A direct chat with this nickname was established.
    ChatOpened(String),
    MessageReceived(ChatLine),
    /// The partner sent `/quit`.
    ChatPeerLeft(String),
    /// The partner vanished without saying goodbye.
    ChatDisconnected(String),
}
