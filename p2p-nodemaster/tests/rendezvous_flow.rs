use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use p2p_nodemaster::config::NodeConfig;
use p2p_nodemaster::network::{PresenceRegistry, RendezvousNode, SessionHandle};
use rendezvous_chat::common::protocol::{TOO_LONG_WARNING, parse_roster};
use rendezvous_chat::common::{NetworkEvent, PeerRecord};
use rendezvous_chat::config::{AppConfig, Timing};
use rendezvous_chat::network::{FrameReader, FrameWriter, FramedChannel, RegistryClient};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(3);

struct RawPeer {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl RawPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = FramedChannel::new(stream).into_split();
        Self { reader, writer }
    }

    async fn register(addr: SocketAddr, registration: &str) -> (Self, String) {
        let mut peer = Self::connect(addr).await;
        peer.send(registration).await;
        let roster = peer.next_frame().await.expect("roster frame");
        (peer, roster)
    }

    async fn send(&mut self, frame: &str) {
        self.writer.send(frame).await.expect("send");
    }

    async fn next_frame(&mut self) -> Option<String> {
        timeout(WAIT, self.reader.receive(4096))
            .await
            .expect("frame in time")
            .expect("read")
    }

    /// Reads until `needle` shows up; frames sent back to back may share a
    /// read.
    async fn collect_until(&mut self, mut seen: String, needle: &str) -> String {
        while !seen.contains(needle) {
            let frame = self.next_frame().await.expect("connection open");
            seen.push_str(&frame);
        }
        seen
    }

    async fn assert_silent(&mut self) {
        let extra = timeout(Duration::from_millis(200), self.reader.receive(4096)).await;
        assert!(extra.is_err(), "unexpected frame: {extra:?}");
    }
}

async fn start_node(idle_timeout: Duration) -> (SocketAddr, Arc<PresenceRegistry>) {
    let config = NodeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        idle_timeout,
        ..NodeConfig::default()
    };
    let node = RendezvousNode::bind(config).await.expect("bind node");
    let addr = node.local_addr().expect("local addr");
    let registry = node.registry();
    tokio::spawn(async move {
        let _ = node.run().await;
    });
    (addr, registry)
}

async fn wait_for_nicknames(registry: &PresenceRegistry, expected: &[&str]) {
    let expected: BTreeSet<String> = expected.iter().map(|name| name.to_string()).collect();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let current: BTreeSet<String> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|peer| peer.nickname)
            .collect();
        if current == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry holds {current:?}, expected {expected:?}"
        );
        sleep(Duration::from_millis(20)).await;
    }
}

fn fast_timing() -> Timing {
    Timing {
        response_timeout: Duration::from_secs(2),
        heartbeat_delay: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(50),
        disconnect_grace: Duration::from_millis(50),
        chat_idle_timeout: Duration::from_secs(5),
    }
}

fn client_config(addr: SocketAddr, nickname: &str, chat_port: u16) -> AppConfig {
    AppConfig {
        nickname: nickname.into(),
        chat_port,
        server_host: addr.ip().to_string(),
        server_port: addr.port(),
        timing: fast_timing(),
    }
}

#[tokio::test]
async fn alice_sees_bob_come_and_go() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;

    let (mut alice, alice_roster) = RawPeer::register(addr, "alice 40001").await;
    assert!(parse_roster(&alice_roster).unwrap().is_empty());

    let (mut bob, bob_roster) = RawPeer::register(addr, "bob 40002").await;
    assert_eq!(
        parse_roster(&bob_roster).unwrap(),
        vec![PeerRecord::new("alice", "127.0.0.1", 40001)]
    );
    assert_eq!(
        alice.next_frame().await.as_deref(),
        Some("ONL bob;127.0.0.1;40002")
    );

    bob.send("/quit").await;
    assert_eq!(alice.next_frame().await.as_deref(), Some("OFL bob"));
    assert_eq!(bob.next_frame().await, None);
    wait_for_nicknames(&registry, &["alice"]).await;
}

#[tokio::test]
async fn existing_peers_each_hear_about_a_newcomer_once() {
    let (addr, _registry) = start_node(Duration::from_secs(10)).await;

    let (mut a, _) = RawPeer::register(addr, "a 40001").await;
    let (mut b, _) = RawPeer::register(addr, "b 40002").await;
    assert_eq!(a.next_frame().await.as_deref(), Some("ONL b;127.0.0.1;40002"));

    let (mut p, p_roster) = RawPeer::register(addr, "p 40003").await;
    assert_eq!(p_roster, "a;127.0.0.1;40001&b;127.0.0.1;40002&");

    assert_eq!(a.next_frame().await.as_deref(), Some("ONL p;127.0.0.1;40003"));
    assert_eq!(b.next_frame().await.as_deref(), Some("ONL p;127.0.0.1;40003"));
    a.assert_silent().await;
    b.assert_silent().await;
    p.assert_silent().await;
}

#[tokio::test]
async fn taken_nickname_is_rejected_and_table_unchanged() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;
    let (_alice, _) = RawPeer::register(addr, "alice 40001").await;

    let (mut impostor, reply) = RawPeer::register(addr, "alice 40009").await;
    assert_eq!(
        reply,
        "ERROR Nickname already taken, please try a different one."
    );
    assert_eq!(impostor.next_frame().await, None);
    assert_eq!(
        registry.snapshot().await,
        vec![PeerRecord::new("alice", "127.0.0.1", 40001)]
    );
}

#[tokio::test]
async fn malformed_registrations_get_error_frames() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;

    let (mut missing, reply) = RawPeer::register(addr, "alice").await;
    assert_eq!(reply, "ERROR Expected nickname and port number.");
    assert_eq!(missing.next_frame().await, None);

    let (_, reply) = RawPeer::register(addr, "alice port").await;
    assert_eq!(reply, "ERROR Port number must be numeric.");

    let long = format!("{} 40001", "x".repeat(41));
    let (_, reply) = RawPeer::register(addr, &long).await;
    assert_eq!(
        reply,
        "ERROR Nickname or port number too long, please try again."
    );

    assert!(registry.snapshot().await.is_empty());
}

#[tokio::test]
async fn long_frames_are_warned_and_quit_is_case_insensitive() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;
    let (mut alice, _) = RawPeer::register(addr, "alice 40001").await;

    alice.send(&"z".repeat(141)).await;
    assert_eq!(alice.next_frame().await.as_deref(), Some(TOO_LONG_WARNING));

    alice.send("KEEPALIVE").await;
    alice.assert_silent().await;
    wait_for_nicknames(&registry, &["alice"]).await;

    alice.send("/QUIT").await;
    assert_eq!(alice.next_frame().await, None);
    wait_for_nicknames(&registry, &[]).await;
}

#[tokio::test]
async fn idle_peer_is_reclaimed() {
    let (addr, registry) = start_node(Duration::from_millis(300)).await;
    let (mut watcher, _) = RawPeer::register(addr, "watcher 40001").await;
    let (mut idle, _) = RawPeer::register(addr, "idle 40002").await;

    // Both go quiet; the watcher still hears about the second peer first.
    assert_eq!(
        watcher.next_frame().await.as_deref(),
        Some("ONL idle;127.0.0.1;40002")
    );
    assert_eq!(idle.next_frame().await, None);
    wait_for_nicknames(&registry, &[]).await;
}

#[tokio::test]
async fn subscriber_that_stops_draining_is_announced_offline() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;
    let (mut alice, _) = RawPeer::register(addr, "alice 40001").await;

    // A subscriber whose queue holds only its roster.
    let (stuck_tx, _stuck_rx) = mpsc::channel(1);
    let stuck = SessionHandle::new(stuck_tx);
    assert!(
        registry
            .register(PeerRecord::new("stuck", "10.0.0.9", 40009), &stuck)
            .await
    );

    let (mut bob, bob_first) = RawPeer::register(addr, "bob 40002").await;
    let bob_seen = bob.collect_until(bob_first, "OFL stuck").await;
    assert!(bob_seen.starts_with("alice;127.0.0.1;40001&stuck;10.0.0.9;40009&"));

    let alice_seen = alice.collect_until(String::new(), "OFL stuck").await;
    assert_eq!(
        alice_seen,
        "ONL stuck;10.0.0.9;40009ONL bob;127.0.0.1;40002OFL stuck"
    );

    assert!(!stuck.is_alive());
    wait_for_nicknames(&registry, &["alice", "bob"]).await;
    alice.assert_silent().await;
    bob.assert_silent().await;
}

#[tokio::test]
async fn client_roster_mirrors_registry() {
    let (addr, registry) = start_node(Duration::from_secs(10)).await;
    let (mut alice, _) = RawPeer::register(addr, "alice 40001").await;
    let (mut bob, _) = RawPeer::register(addr, "bob 40002").await;
    let _ = alice.next_frame().await;

    let before = registry.snapshot().await;
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (client, initial) = RegistryClient::connect(&client_config(addr, "carol", 40003), events_tx)
        .await
        .expect("carol registers");

    let as_set = |peers: &[PeerRecord]| peers.iter().cloned().collect::<BTreeSet<_>>();
    assert_eq!(as_set(&initial), as_set(&before));
    assert_eq!(as_set(&client.roster().await), as_set(&before));

    bob.send("/quit").await;
    let event = timeout(WAIT, events_rx.recv()).await.expect("event in time");
    assert_eq!(event, Some(NetworkEvent::PeerOffline("bob".into())));
    assert_eq!(
        client.roster().await,
        vec![PeerRecord::new("alice", "127.0.0.1", 40001)]
    );
    assert!(client.find("bob").await.is_none());

    let (mut dave, _) = RawPeer::register(addr, "dave 40004").await;
    let event = timeout(WAIT, events_rx.recv()).await.expect("event in time");
    assert_eq!(
        event,
        Some(NetworkEvent::PeerOnline(PeerRecord::new("dave", "127.0.0.1", 40004)))
    );
    assert_eq!(
        client.find("dave").await,
        Some(PeerRecord::new("dave", "127.0.0.1", 40004))
    );
    dave.assert_silent().await;

    client.disconnect().await;
    wait_for_nicknames(&registry, &["alice", "dave"]).await;
}

#[tokio::test]
async fn heartbeats_keep_client_registered() {
    let (addr, registry) = start_node(Duration::from_millis(300)).await;
    let (events_tx, _events_rx) = mpsc::channel(8);
    let (client, initial) = RegistryClient::connect(&client_config(addr, "carol", 40003), events_tx)
        .await
        .expect("carol registers");
    assert!(initial.is_empty());

    sleep(Duration::from_millis(1000)).await;
    assert!(client.is_connected());
    wait_for_nicknames(&registry, &["carol"]).await;

    client.disconnect().await;
    wait_for_nicknames(&registry, &[]).await;
}

#[tokio::test]
async fn client_surfaces_rejection_reason() {
    let (addr, _registry) = start_node(Duration::from_secs(10)).await;
    let (_dave, _) = RawPeer::register(addr, "dave 40001").await;

    let (events_tx, _events_rx) = mpsc::channel(8);
    let result = RegistryClient::connect(&client_config(addr, "dave", 40002), events_tx).await;
    match result {
        Err(rendezvous_chat::Error::Rejected(reason)) => {
            assert_eq!(reason, "Nickname already taken, please try a different one.")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate nickname accepted"),
    }
}
