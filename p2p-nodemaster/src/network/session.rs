use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rendezvous_chat::common::PeerRecord;
use rendezvous_chat::common::protocol::{
    MAX_MESSAGE_LEN, MAX_REGISTRATION_LEN, TOO_LONG_WARNING, encode_error, is_quit,
    parse_registration, strip_keep_alives,
};
use rendezvous_chat::error::ProtocolError;
use rendezvous_chat::network::{FrameReader, FrameWriter, FramedChannel};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::broadcast::SessionHandle;
use super::registry::PresenceRegistry;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
/// How long a closing session may spend flushing its last frames.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// One byte over each limit, so an oversized frame can be recognised.
const REGISTRATION_READ_LIMIT: usize = MAX_REGISTRATION_LEN + 1;
const MESSAGE_READ_LIMIT: usize = MAX_MESSAGE_LEN + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Registered { nickname: String },
    Closed,
}

/// The node master's side of one peer connection.
pub struct RegistrySession {
    registry: Arc<PresenceRegistry>,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
    handle: SessionHandle,
    reader: FrameReader<OwnedReadHalf>,
}

impl RegistrySession {
    /// Drives the connection from handshake to close. Never fails: every
    /// problem ends in `Closed`, which cleans up after the peer.
    pub async fn run(
        stream: TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<PresenceRegistry>,
        idle_timeout: Duration,
    ) {
        let (reader, writer) = FramedChannel::new(stream).into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let writer_task = tokio::spawn(drain_outbound(writer, outbound_rx, peer_addr));

        let mut session = Self {
            registry,
            peer_addr,
            idle_timeout,
            handle: SessionHandle::new(outbound_tx),
            reader,
        };

        let mut state = SessionState::AwaitingHandshake;
        loop {
            state = match state {
                SessionState::AwaitingHandshake => session.await_handshake().await,
                SessionState::Registered { nickname } => session.serve(&nickname).await,
                SessionState::Closed => break,
            };
        }

        session.close(writer_task).await;
    }

    async fn await_handshake(&mut self) -> SessionState {
        let Some(frame) = self.next_frame(REGISTRATION_READ_LIMIT).await else {
            return SessionState::Closed;
        };

        let registration = match parse_registration(&frame) {
            Ok(registration) => registration,
            Err(err) => {
                self.reject(&err);
                return SessionState::Closed;
            }
        };

        let record = PeerRecord::new(
            registration.nickname.clone(),
            self.peer_addr.ip().to_string(),
            registration.port,
        );
        if !self.registry.register(record, &self.handle).await {
            self.reject(&ProtocolError::NicknameTaken);
            return SessionState::Closed;
        }

        log::info!(
            "Registered {} @ {}:{}",
            registration.nickname,
            self.peer_addr.ip(),
            registration.port
        );
        SessionState::Registered {
            nickname: registration.nickname,
        }
    }

    async fn serve(&mut self, nickname: &str) -> SessionState {
        loop {
            let Some(frame) = self.next_frame(MESSAGE_READ_LIMIT).await else {
                return SessionState::Closed;
            };

            let text = strip_keep_alives(&frame);
            if text.len() > MAX_MESSAGE_LEN {
                if !self.handle.enqueue(TOO_LONG_WARNING) {
                    return SessionState::Closed;
                }
                continue;
            }
            if is_quit(text) {
                log::info!("Received quit command from {nickname}");
                return SessionState::Closed;
            }
            // Keep-alives, and anything else for now, need no answer.
        }
    }

    /// `None` on EOF, reset, idle timeout, or when the broadcaster gave up on
    /// this session.
    async fn next_frame(&mut self, limit: usize) -> Option<String> {
        let Self {
            reader,
            handle,
            idle_timeout,
            peer_addr,
            ..
        } = self;

        tokio::select! {
            read = timeout(*idle_timeout, reader.receive(limit)) => match read {
                Ok(Ok(Some(frame))) => Some(frame),
                Ok(Ok(None)) => {
                    log::debug!("{peer_addr} closed the connection");
                    None
                }
                Ok(Err(err)) => {
                    log::info!("Connection with {peer_addr} reset: {err}");
                    None
                }
                Err(_) => {
                    log::info!("Connection with {peer_addr} timed out");
                    None
                }
            },
            _ = handle.closed() => {
                log::info!("Session with {peer_addr} dropped by broadcaster");
                None
            }
        }
    }

    fn reject(&self, err: &ProtocolError) {
        log::info!("Rejecting {}: {err}", self.peer_addr);
        self.handle.enqueue(encode_error(&err.to_string()));
    }

    async fn close(self, mut writer_task: JoinHandle<()>) {
        self.registry.release(self.handle.id()).await;
        self.handle.close();

        let peer_addr = self.peer_addr;
        // Dropping the last sender lets the writer flush and hang up.
        drop(self);
        if timeout(DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
            log::warn!("Writer for {peer_addr} did not finish; aborting");
            writer_task.abort();
        }
        log::debug!("Session with {peer_addr} closed");
    }
}

async fn drain_outbound(
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut outbound: mpsc::Receiver<String>,
    peer_addr: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.send(&frame).await {
            log::debug!("Failed to write to {peer_addr}: {err}");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        log::debug!("Failed to shut down connection with {peer_addr}: {err}");
    }
}
