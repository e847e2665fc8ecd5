use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::common::NetworkEvent;
use crate::config::Timing;
use crate::error::{Error, Result};

use super::chat::ChatSession;

/// Accepts direct chat connections from other peers.
pub struct ChatListener {
    listener: TcpListener,
    local_nickname: String,
    timing: Timing,
}

impl ChatListener {
    /// A bind failure only disables incoming chats; it is reported as a
    /// configuration error.
    pub async fn bind(address: &str, local_nickname: &str, timing: Timing) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|err| Error::Config(format!("cannot listen on {address}: {err}")))?;
        log::info!("Chat listener established at {}", listener.local_addr()?);

        Ok(Self {
            listener,
            local_nickname: local_nickname.to_string(),
            timing,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts until `shutdown` flips to true (or its sender goes away),
    /// handing every handshaken session to `sessions`.
    pub async fn run(
        self,
        sessions: mpsc::Sender<ChatSession>,
        event_sender: mpsc::Sender<NetworkEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        log::debug!("Chat connection established with {remote}");
                        tokio::spawn(hand_off(
                            stream,
                            remote,
                            self.local_nickname.clone(),
                            self.timing,
                            sessions.clone(),
                            event_sender.clone(),
                        ));
                    }
                    Err(err) => log::warn!("Failed to accept chat connection: {err}"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Shutting down local chat listener");
    }
}

async fn hand_off(
    stream: TcpStream,
    remote: SocketAddr,
    local_nickname: String,
    timing: Timing,
    sessions: mpsc::Sender<ChatSession>,
    event_sender: mpsc::Sender<NetworkEvent>,
) {
    match ChatSession::accept(stream, &local_nickname, timing, event_sender).await {
        Ok(session) => {
            if let Err(err) = sessions.send(session).await {
                log::warn!("Nobody is taking chat sessions; dropping one from {remote}");
                err.0.close().await;
            }
        }
        Err(err) => log::warn!("Chat handshake with {remote} failed: {err}"),
    }
}
