//! Direct peer-to-peer conversation.
//!
//! The connecting side opens with a handshake of one length byte followed by
//! its nickname, sent in a single write. After that both sides exchange plain
//! text frames of at most [`MAX_MESSAGE_LEN`] bytes, `KEEPALIVE` frames, and
//! finally `/quit`.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

use crate::common::protocol::{
    KEEP_ALIVE, MAX_MESSAGE_LEN, MAX_NICKNAME_LEN, QUIT, is_valid_nickname, strip_keep_alives,
};
use crate::common::{ChatLine, NetworkEvent, PeerRecord};
use crate::config::Timing;
use crate::error::{Error, ProtocolError, Result};

use super::transport::{FrameReader, FrameWriter, FramedChannel};

type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;

// Room for a full message with a keep-alive stuck to either end.
const CHAT_READ_LIMIT: usize = MAX_MESSAGE_LEN + 2 * KEEP_ALIVE.len();

pub fn encode_handshake(nickname: &str) -> std::result::Result<Vec<u8>, ProtocolError> {
    let len = nickname.len();
    if len == 0 || len > MAX_NICKNAME_LEN {
        return Err(ProtocolError::InvalidHandshake(len));
    }
    let mut frame = Vec::with_capacity(len + 1);
    frame.push(len as u8);
    frame.extend_from_slice(nickname.as_bytes());
    Ok(frame)
}

/// Reads exactly the handshake, so a chat message sent right behind it stays
/// in the stream.
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Result<String> {
    let len = usize::from(reader.receive_exact(1).await?[0]);
    if len == 0 || len > MAX_NICKNAME_LEN {
        return Err(ProtocolError::InvalidHandshake(len).into());
    }
    let bytes = reader.receive_exact(len).await?;
    let nickname = String::from_utf8_lossy(&bytes).into_owned();
    if !is_valid_nickname(&nickname) {
        return Err(ProtocolError::InvalidNickname(nickname).into());
    }
    Ok(nickname)
}

/// Local check applied before anything is put on the wire.
pub fn validate_message(text: &str) -> std::result::Result<(), ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLong { len: text.len() });
    }
    Ok(())
}

/// One end of a handshaken chat connection.
pub struct ChatSession {
    local_nickname: String,
    remote_nickname: String,
    writer: SharedWriter,
    receiver: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    open: watch::Receiver<bool>,
}

impl ChatSession {
    /// Outbound variant: dial `target`'s chat listener and introduce ourselves.
    pub async fn connect(
        local_nickname: &str,
        target: &PeerRecord,
        timing: Timing,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Result<Self> {
        let handshake = encode_handshake(local_nickname)?;
        let stream = timeout(timing.response_timeout, TcpStream::connect(target.address()))
            .await
            .map_err(|_| Error::Timeout("chat connection"))??;
        let (reader, mut writer) = FramedChannel::new(stream).into_split();
        writer.send(handshake).await?;

        log::info!("Opened chat with {} @ {}", target.nickname, target.address());
        Ok(Self::start(
            local_nickname,
            target.nickname.clone(),
            reader,
            writer,
            timing,
            event_sender,
        )
        .await)
    }

    /// Inbound variant: the listener accepted `stream`; learn who is calling.
    pub async fn accept(
        stream: TcpStream,
        local_nickname: &str,
        timing: Timing,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Result<Self> {
        let (mut reader, writer) = FramedChannel::new(stream).into_split();
        let remote_nickname = timeout(timing.response_timeout, read_handshake(&mut reader))
            .await
            .map_err(|_| Error::Timeout("chat handshake"))??;

        log::info!("Accepted chat from {remote_nickname}");
        Ok(Self::start(
            local_nickname,
            remote_nickname,
            reader,
            writer,
            timing,
            event_sender,
        )
        .await)
    }

    async fn start(
        local_nickname: &str,
        remote_nickname: String,
        reader: FrameReader<OwnedReadHalf>,
        writer: FrameWriter<OwnedWriteHalf>,
        timing: Timing,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        let writer = Arc::new(Mutex::new(writer));
        let (open_tx, open) = watch::channel(true);

        let _ = event_sender
            .send(NetworkEvent::ChatOpened(remote_nickname.clone()))
            .await;

        let receiver = tokio::spawn(receive_lines(
            reader,
            remote_nickname.clone(),
            timing,
            event_sender,
            open_tx,
        ));
        let heartbeat = tokio::spawn(send_keep_alives(writer.clone(), timing));

        Self {
            local_nickname: local_nickname.to_string(),
            remote_nickname,
            writer,
            receiver,
            heartbeat,
            open,
        }
    }

    pub fn local_nickname(&self) -> &str {
        &self.local_nickname
    }

    pub fn remote_nickname(&self) -> &str {
        &self.remote_nickname
    }

    /// True until the partner quits, the connection drops, or it goes idle.
    pub fn is_open(&self) -> bool {
        *self.open.borrow() && !self.receiver.is_finished()
    }

    pub async fn wait_closed(&self) {
        let mut open = self.open.clone();
        let _ = open.wait_for(|open| !*open).await;
    }

    /// Texts that are empty or longer than [`MAX_MESSAGE_LEN`] bytes are
    /// refused without touching the connection.
    pub async fn send(&self, text: &str) -> Result<()> {
        validate_message(text)?;
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.writer.lock().await.send(text).await?;
        Ok(())
    }

    /// Best-effort `/quit`, then release the connection.
    pub async fn close(self) {
        self.heartbeat.abort();

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.send(QUIT).await {
            log::debug!("Failed to send quit to {}: {err}", self.remote_nickname);
        }
        if let Err(err) = writer.shutdown().await {
            log::debug!("Failed to shut down chat with {}: {err}", self.remote_nickname);
        }
        drop(writer);

        self.receiver.abort();
        log::info!("Closed chat with {}", self.remote_nickname);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.receiver.abort();
    }
}

async fn send_keep_alives(writer: SharedWriter, timing: Timing) {
    sleep(timing.heartbeat_delay).await;
    let mut ticker = interval(timing.heartbeat_interval);

    loop {
        ticker.tick().await;
        if let Err(err) = writer.lock().await.send(KEEP_ALIVE).await {
            log::debug!("Chat keep-alive failed: {err}");
            return;
        }
    }
}

async fn receive_lines(
    mut reader: FrameReader<OwnedReadHalf>,
    remote_nickname: String,
    timing: Timing,
    event_sender: mpsc::Sender<NetworkEvent>,
    open: watch::Sender<bool>,
) {
    let ending = loop {
        let frame = match timeout(timing.chat_idle_timeout, reader.receive(CHAT_READ_LIMIT)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                log::info!("{remote_nickname} closed the chat connection");
                break NetworkEvent::ChatDisconnected(remote_nickname.clone());
            }
            Ok(Err(err)) => {
                log::warn!("Chat with {remote_nickname} failed: {err}");
                break NetworkEvent::ChatDisconnected(remote_nickname.clone());
            }
            Err(_) => {
                log::warn!("Chat with {remote_nickname} timed out");
                break NetworkEvent::ChatDisconnected(remote_nickname.clone());
            }
        };

        let text = strip_keep_alives(&frame);
        if text.is_empty() {
            continue;
        }
        if text == QUIT {
            log::info!("{remote_nickname} left the chat");
            break NetworkEvent::ChatPeerLeft(remote_nickname.clone());
        }

        let line = ChatLine::new(remote_nickname.as_str(), text);
        let _ = event_sender.send(NetworkEvent::MessageReceived(line)).await;
    };

    let _ = open.send(false);
    let _ = event_sender.send(ending).await;
}
