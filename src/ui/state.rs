use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

use crate::common::{ChatLine, PeerRecord};

/// Debug event để hiển thị thông tin mạng
#[derive(Debug, Clone)]
pub struct DebugEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub peer: Option<String>,
    pub message: String,
}

const MAX_DEBUG_EVENTS: usize = 100;

/// Trạng thái cục bộ của console.
pub struct AppState {
    pub nickname: String,
    pub messages: Vec<ChatLine>,
    /// Online peers in the order the node master reported them.
    pub peers: Vec<PeerRecord>,
    pub debug_events: Vec<DebugEvent>,
    /// Nickname -> when the peer was last reported online
    pub peer_last_seen: HashMap<String, DateTime<Utc>>,
    /// Open chats, oldest first. The last one receives plain text.
    pub chats: Vec<String>,
    pub registry_connected: bool,
}

impl AppState {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            messages: Vec::new(),
            peers: Vec::new(),
            debug_events: Vec::new(),
            peer_last_seen: HashMap::new(),
            chats: Vec::new(),
            registry_connected: true,
        }
    }

    pub fn set_roster(&mut self, roster: Vec<PeerRecord>) {
        let now = Utc::now();
        for peer in &roster {
            self.peer_last_seen.insert(peer.nickname.clone(), now);
        }
        self.add_debug_event(
            "ROSTER".to_string(),
            None,
            format!("{} peer(s) online", roster.len()),
        );
        self.peers = roster;
    }

    pub fn find_peer(&self, nickname: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|peer| peer.nickname == nickname)
    }

    pub fn add_peer(&mut self, peer: PeerRecord) {
        let now = Utc::now();
        let nickname = peer.nickname.clone();
        let is_new = self.find_peer(&nickname).is_none();

        self.peers.retain(|known| known.nickname != nickname);
        self.peers.push(peer);
        self.peer_last_seen.insert(nickname.clone(), now);

        let event_type = if is_new { "PEER_ONLINE" } else { "PEER_REFRESHED" };
        self.add_debug_event(
            event_type.to_string(),
            Some(nickname),
            format!("Peer online at {}", now.format("%H:%M:%S")),
        );
    }

    /// Returns whether the peer was in the roster.
    pub fn remove_peer(&mut self, nickname: &str) -> bool {
        let now = Utc::now();
        let was_online = self.find_peer(nickname).is_some();
        if !was_online {
            return false;
        }
        self.peers.retain(|peer| peer.nickname != nickname);

        // Tính thời gian đã online nếu có last_seen
        let duration_msg = match self.peer_last_seen.get(nickname) {
            Some(last_seen) => {
                let duration = now.signed_duration_since(*last_seen);
                format!(
                    " (Was online for {:.1}s)",
                    duration.num_milliseconds() as f64 / 1000.0
                )
            }
            None => String::new(),
        };
        self.add_debug_event(
            "PEER_OFFLINE".to_string(),
            Some(nickname.to_string()),
            format!("Peer offline at {}{}", now.format("%H:%M:%S"), duration_msg),
        );
        true
    }

    pub fn push_message(&mut self, message: ChatLine) {
        self.add_debug_event(
            "MESSAGE_RECEIVED".to_string(),
            Some(message.from.clone()),
            format!("{} bytes", message.text.len()),
        );
        self.messages.push(message);
    }

    /// Our own outgoing line, kept alongside received ones.
    pub fn push_own_message(&mut self, to: &str, text: &str) {
        let line = ChatLine::new(self.nickname.as_str(), text);
        self.add_debug_event(
            "MESSAGE_SENT".to_string(),
            Some(to.to_string()),
            format!("{} bytes", text.len()),
        );
        self.messages.push(line);
    }

    pub fn open_chat(&mut self, nickname: &str) {
        self.chats.retain(|chat| chat != nickname);
        self.chats.push(nickname.to_string());
        self.add_debug_event(
            "CHAT_OPENED".to_string(),
            Some(nickname.to_string()),
            "Chat opened".to_string(),
        );
    }

    pub fn close_chat(&mut self, nickname: &str, reason: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|chat| chat != nickname);
        let closed = self.chats.len() != before;
        if closed {
            self.add_debug_event(
                "CHAT_CLOSED".to_string(),
                Some(nickname.to_string()),
                reason.to_string(),
            );
        }
        closed
    }

    pub fn current_chat(&self) -> Option<&str> {
        self.chats.last().map(String::as_str)
    }

    pub fn registry_lost(&mut self) {
        self.registry_connected = false;
        self.add_debug_event(
            "REGISTRY_LOST".to_string(),
            None,
            "Connection with node master lost; roster is stale".to_string(),
        );
    }

    pub fn add_debug_event(&mut self, event_type: String, peer: Option<String>, message: String) {
        match &peer {
            Some(peer) => log::debug!("[{event_type}] {peer}: {message}"),
            None => log::debug!("[{event_type}] {message}"),
        }
        self.debug_events.push(DebugEvent {
            timestamp: Utc::now(),
            event_type,
            peer,
            message,
        });

        // Giữ tối đa 100 events để không chiếm quá nhiều bộ nhớ
        if self.debug_events.len() > MAX_DEBUG_EVENTS {
            self.debug_events.remove(0);
        }
    }

    /// Seconds since an offline peer was last reported online. `None` for
    /// peers that are online or were never seen.
    pub fn get_time_since_last_seen(&self, nickname: &str) -> Option<f64> {
        if self.find_peer(nickname).is_some() {
            return None;
        }
        self.peer_last_seen.get(nickname).map(|last_seen| {
            let duration = Utc::now().signed_duration_since(*last_seen);
            duration.num_milliseconds() as f64 / 1000.0
        })
    }

    pub fn recent_messages(&self, limit: usize) -> &[ChatLine] {
        tail(&self.messages, limit)
    }

    pub fn recent_debug_events(&self, limit: usize) -> &[DebugEvent] {
        tail(&self.debug_events, limit)
    }
}

fn tail<T>(items: &[T], limit: usize) -> &[T] {
    &items[items.len().saturating_sub(limit)..]
}

/// `[HH:MM:SS] EVENT_TYPE peer: message`
pub fn format_debug_event(event: &DebugEvent) -> String {
    let peer = event
        .peer
        .as_deref()
        .map(|peer| format!(" {peer}:"))
        .unwrap_or_default();
    format!(
        "[{}] {}{peer} {}",
        event.timestamp.format("%H:%M:%S"),
        event.event_type,
        event.message
    )
}

/// `[HH:MM:SS] from: text`
pub fn format_line(line: &ChatLine) -> String {
    let time = Utc
        .timestamp_opt(line.timestamp, 0)
        .single()
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!("[{time}] {}: {}", line.from, line.text)
}
