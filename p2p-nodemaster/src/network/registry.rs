use std::collections::VecDeque;

use rendezvous_chat::common::protocol::encode_roster;
use rendezvous_chat::common::{PeerRecord, RegistryEvent};
use tokio::sync::Mutex;

use super::broadcast::{Broadcaster, SessionHandle, SessionId};

#[derive(Debug)]
struct Entry {
    record: PeerRecord,
    // The session that registered the record; only it may release it.
    session: SessionId,
}

#[derive(Debug, Default)]
struct RegistryState {
    // Insertion order is the roster order.
    table: Vec<Entry>,
    broadcaster: Broadcaster,
}

impl RegistryState {
    fn position(&self, nickname: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.record.nickname == nickname)
    }

    fn roster(&self) -> Vec<PeerRecord> {
        self.table.iter().map(|entry| entry.record.clone()).collect()
    }

    /// Broadcasts `frame`. A session the broadcaster gives up on loses its
    /// record, and everyone left hears `OFL` for it.
    fn announce(&mut self, frame: String, except: Option<SessionId>) {
        let mut pending = VecDeque::from([(frame, except)]);
        while let Some((frame, except)) = pending.pop_front() {
            let delivery = self.broadcaster.send_to_all(&frame, except);
            for id in delivery.dropped {
                let Some(index) = self.table.iter().position(|entry| entry.session == id) else {
                    continue;
                };
                let entry = self.table.remove(index);
                log::info!(
                    "Deregistered {}: it stopped taking updates",
                    entry.record.nickname
                );
                pending.push_back((RegistryEvent::Offline(entry.record.nickname).encode(), None));
            }
        }
    }
}

/// Who is online, keyed by nickname. Every read and write goes through one
/// lock, so registry changes are broadcast in the order they were applied.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    state: Mutex<RegistryState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record` unless its nickname is taken.
    ///
    /// On success `session` gets the roster of everybody else as its first
    /// frame, the others get `ONL`, and `session` starts receiving broadcasts.
    /// All of that happens under the lock, so nothing can sneak in ahead of
    /// the roster.
    pub async fn register(&self, record: PeerRecord, session: &SessionHandle) -> bool {
        let mut state = self.state.lock().await;
        if state.position(&record.nickname).is_some() {
            log::info!("Nickname {} already taken", record.nickname);
            return false;
        }

        if !session.enqueue(encode_roster(&state.roster())) {
            log::warn!("Could not queue roster for {}", record.nickname);
        }

        let announcement = RegistryEvent::Online(record.clone()).encode();
        state.table.push(Entry {
            record,
            session: session.id(),
        });
        state.broadcaster.attach(session.clone());
        state.announce(announcement, Some(session.id()));
        true
    }

    /// Removes `nickname` and tells everyone still attached. Absent or empty
    /// nicknames are ignored. Returns whether anything was removed.
    pub async fn deregister(&self, nickname: &str) -> bool {
        if nickname.is_empty() {
            return false;
        }
        let mut state = self.state.lock().await;
        let Some(index) = state.position(nickname) else {
            return false;
        };
        state.table.remove(index);
        state.announce(RegistryEvent::Offline(nickname.to_string()).encode(), None);
        true
    }

    /// Stops broadcasts to a closing session and deregisters whatever
    /// nickname it still holds. Returns whether a nickname was released.
    pub async fn release(&self, id: SessionId) -> bool {
        let mut state = self.state.lock().await;
        state.broadcaster.detach(id);
        let Some(index) = state.table.iter().position(|entry| entry.session == id) else {
            return false;
        };
        let entry = state.table.remove(index);
        state.announce(RegistryEvent::Offline(entry.record.nickname).encode(), None);
        true
    }

    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.state.lock().await.roster()
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.table.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.broadcaster.len()
    }
}
