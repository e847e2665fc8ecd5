use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

use crate::common::protocol::{
    KEEP_ALIVE, QUIT, encode_registration, error_reason, parse_roster, split_events,
    split_roster_reply,
};
use crate::common::{NetworkEvent, PeerRecord, RegistryEvent};
use crate::config::{AppConfig, Timing};
use crate::error::{Error, Result};

use super::transport::{FrameReader, FrameWriter, FramedChannel};

/// The initial roster is a single frame that grows with the number of peers.
const ROSTER_READ_LIMIT: usize = 64 * 1024;
const UPDATE_READ_LIMIT: usize = 1024;

type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;
type SharedRoster = Arc<RwLock<Vec<PeerRecord>>>;

/// Our registration with a node master: keeps it alive with heartbeats and
/// mirrors the node master's presence table into a local roster.
pub struct RegistryClient {
    nickname: String,
    writer: SharedWriter,
    roster: SharedRoster,
    connected: Arc<AtomicBool>,
    heartbeat: JoinHandle<()>,
    receiver: JoinHandle<()>,
    timing: Timing,
}

impl RegistryClient {
    /// Registers `config.nickname` / `config.chat_port` with the node master
    /// at `config.server_address()` and returns the roster it answered with.
    pub async fn connect(
        config: &AppConfig,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Result<(Self, Vec<PeerRecord>)> {
        let timing = config.timing;
        let address = config.server_address();
        log::info!("Connecting to node master at {address} as {}", config.nickname);

        let stream = timeout(timing.response_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::Timeout("node master connection"))??;
        let (mut reader, mut writer) = FramedChannel::new(stream).into_split();

        writer
            .send(encode_registration(&config.nickname, config.chat_port))
            .await?;

        let response = timeout(timing.response_timeout, reader.receive(ROSTER_READ_LIMIT))
            .await
            .map_err(|_| Error::Timeout("node master roster"))??
            .ok_or(Error::Closed)?;

        if let Some(reason) = error_reason(&response) {
            log::warn!("Node master rejected registration: {reason}");
            return Err(Error::Rejected(reason.to_string()));
        }

        let (roster_frame, trailing) = split_roster_reply(&response);
        let initial = parse_roster(roster_frame)?;
        log::info!(
            "Registered with node master; {} peer(s) online",
            initial.len()
        );

        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let roster: SharedRoster = Arc::new(RwLock::new(initial.clone()));
        let connected = Arc::new(AtomicBool::new(true));

        // Updates that raced the roster into the same read.
        for frame in split_events(trailing) {
            apply_update(frame, &roster, &event_sender).await;
        }

        let heartbeat = tokio::spawn(send_heartbeats(
            writer.clone(),
            connected.clone(),
            event_sender.clone(),
            timing,
        ));
        let receiver = tokio::spawn(receive_updates(reader, roster.clone(), event_sender));

        let client = Self {
            nickname: config.nickname.clone(),
            writer,
            roster,
            connected,
            heartbeat,
            receiver,
            timing,
        };
        Ok((client, initial))
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn roster(&self) -> Vec<PeerRecord> {
        self.roster.read().await.clone()
    }

    pub async fn find(&self, nickname: &str) -> Option<PeerRecord> {
        self.roster
            .read()
            .await
            .iter()
            .find(|peer| peer.nickname == nickname)
            .cloned()
    }

    /// Says `/quit`, gives the node master a moment to act on it, then hangs
    /// up whether or not it did.
    pub async fn disconnect(self) {
        self.connected.store(false, Ordering::SeqCst);
        self.heartbeat.abort();

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.send(QUIT).await {
            log::debug!("Failed to send quit to node master: {err}");
        }
        sleep(self.timing.disconnect_grace).await;
        if let Err(err) = writer.shutdown().await {
            log::debug!("Failed to shut down node master connection: {err}");
        }
        drop(writer);

        self.receiver.abort();
        log::info!("Disconnected from node master");
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.receiver.abort();
    }
}

async fn send_heartbeats(
    writer: SharedWriter,
    connected: Arc<AtomicBool>,
    event_sender: mpsc::Sender<NetworkEvent>,
    timing: Timing,
) {
    sleep(timing.heartbeat_delay).await;
    let mut ticker = interval(timing.heartbeat_interval);

    loop {
        ticker.tick().await;
        let result = writer.lock().await.send(KEEP_ALIVE).await;
        if let Err(err) = result {
            if connected.swap(false, Ordering::SeqCst) {
                log::warn!("Connection with node master lost: {err}");
                let _ = event_sender.send(NetworkEvent::RegistryLost).await;
            }
            return;
        }
    }
}

/// Applies `ONL` / `OFL` frames to the roster until the stream ends. Failure
/// is silent here; the heartbeat is what reports a lost connection.
async fn receive_updates(
    mut reader: FrameReader<OwnedReadHalf>,
    roster: SharedRoster,
    event_sender: mpsc::Sender<NetworkEvent>,
) {
    loop {
        let frame = match reader.receive(UPDATE_READ_LIMIT).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("Node master closed the roster stream");
                return;
            }
            Err(err) => {
                log::debug!("Roster stream failed: {err}");
                return;
            }
        };

        for update in split_events(&frame) {
            apply_update(update, &roster, &event_sender).await;
        }
    }
}

async fn apply_update(frame: &str, roster: &SharedRoster, event_sender: &mpsc::Sender<NetworkEvent>) {
    match RegistryEvent::parse(frame) {
        Ok(RegistryEvent::Online(peer)) => {
            log::info!("Peer online: {} @ {}", peer.nickname, peer.address());
            {
                let mut roster = roster.write().await;
                roster.retain(|known| known.nickname != peer.nickname);
                roster.push(peer.clone());
            }
            let _ = event_sender.send(NetworkEvent::PeerOnline(peer)).await;
        }
        Ok(RegistryEvent::Offline(nickname)) => {
            let removed = {
                let mut roster = roster.write().await;
                let before = roster.len();
                roster.retain(|known| known.nickname != nickname);
                roster.len() != before
            };
            if removed {
                log::info!("Peer offline: {nickname}");
                let _ = event_sender.send(NetworkEvent::PeerOffline(nickname)).await;
            }
        }
        Err(err) => log::warn!("Ignoring frame from node master: {err}"),
    }
}
