use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Default)]
struct Liveness {
    dead: AtomicBool,
    closed: Notify,
}

/// The registry's grip on one registry session: its outbound queue plus a
/// way to tell it to shut down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<String>,
    liveness: Arc<Liveness>,
}

impl SessionHandle {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: SessionId::new(),
            outbound,
            liveness: Arc::new(Liveness::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.liveness.dead.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    /// Queues a frame without waiting. False when the queue is full or the
    /// writer is gone.
    pub fn enqueue(&self, frame: impl Into<String>) -> bool {
        match self.outbound.try_send(frame.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbound queue of session {} is full", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Marks the session dead and wakes whoever waits in [`Self::closed`].
    pub fn close(&self) {
        self.liveness.dead.store(true, Ordering::SeqCst);
        self.liveness.closed.notify_one();
    }

    /// Resolves once [`Self::close`] has been called.
    pub async fn closed(&self) {
        if self.liveness.dead.load(Ordering::SeqCst) {
            return;
        }
        self.liveness.closed.notified().await;
    }
}

/// Fans registry changes out to every attached session.
#[derive(Debug, Default)]
pub struct Broadcaster {
    sessions: Vec<SessionHandle>,
}

impl Broadcaster {
    pub fn attach(&mut self, session: SessionHandle) {
        self.sessions.push(session);
    }

    pub fn detach(&mut self, id: SessionId) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|session| session.id() != id);
        self.sessions.len() != before
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queues `frame` for every session except `except`. Never waits: a
    /// session that cannot take the frame is closed and dropped.
    pub fn send_to_all(&mut self, frame: &str, except: Option<SessionId>) -> Delivery {
        log::debug!("Sending to all: {frame}");
        let mut delivery = Delivery::default();
        self.sessions.retain(|session| {
            if Some(session.id()) == except {
                return true;
            }
            if session.is_alive() && session.enqueue(frame) {
                delivery.delivered += 1;
                return true;
            }
            log::info!("Dropping session {} from broadcasts", session.id());
            session.close();
            delivery.dropped.push(session.id());
            false
        });
        delivery
    }
}

/// Outcome of one [`Broadcaster::send_to_all`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions the frame was queued for.
    pub delivered: usize,
    /// Sessions closed because they could not take it.
    pub dropped: Vec<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn excludes_by_identity() {
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = SessionHandle::new(tx_a);
        let b = SessionHandle::new(tx_b);

        let mut broadcaster = Broadcaster::default();
        broadcaster.attach(a.clone());
        broadcaster.attach(b.clone());

        assert_eq!(broadcaster.send_to_all("ONL a;h;1", Some(a.id())).delivered, 1);
        assert_eq!(rx_b.recv().await.as_deref(), Some("ONL a;h;1"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_tears_session_down() {
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = mpsc::channel(8);
        let slow = SessionHandle::new(tx_slow);
        let fast = SessionHandle::new(tx_fast);

        let mut broadcaster = Broadcaster::default();
        broadcaster.attach(slow.clone());
        broadcaster.attach(fast);

        assert_eq!(broadcaster.send_to_all("first", None).delivered, 2);
        assert_eq!(
            broadcaster.send_to_all("second", None),
            Delivery {
                delivered: 1,
                dropped: vec![slow.id()]
            }
        );
        assert_eq!(broadcaster.len(), 1);
        assert!(!slow.is_alive());
        slow.closed().await;

        assert_eq!(rx_fast.recv().await.as_deref(), Some("first"));
        assert_eq!(rx_fast.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn closed_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut broadcaster = Broadcaster::default();
        broadcaster.attach(SessionHandle::new(tx));
        drop(rx);

        assert_eq!(broadcaster.send_to_all("OFL x", None).delivered, 0);
        assert!(broadcaster.is_empty());
    }
}
