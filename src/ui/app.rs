use std::collections::HashMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::common::{NetworkEvent, PeerRecord, UserCommand};
use crate::config::Timing;
use crate::network::{ChatSession, RegistryClient};

use super::state::{AppState, format_debug_event, format_line};

const HISTORY_LINES: usize = 20;

const HELP: &str = "\
Commands:
  /list                  show who is online
  /chat <nickname>       open a chat with an online peer
  /msg <nickname> <text> send text to a peer, opening a chat if needed
  /close <nickname>      end a chat
  /history               show the latest chat lines
  /debug                 show the latest network events
  /quit                  leave
Anything else is sent to the most recently opened chat.";

/// Line-oriented front-end: reads commands from the console and prints what
/// the network reports.
pub struct ConsoleApp {
    state: AppState,
    client: RegistryClient,
    timing: Timing,
    sessions: HashMap<String, ChatSession>,
    event_sender: mpsc::Sender<NetworkEvent>,
    event_receiver: mpsc::Receiver<NetworkEvent>,
    inbound_sessions: mpsc::Receiver<ChatSession>,
}

impl ConsoleApp {
    pub fn new(
        client: RegistryClient,
        roster: Vec<PeerRecord>,
        timing: Timing,
        event_sender: mpsc::Sender<NetworkEvent>,
        event_receiver: mpsc::Receiver<NetworkEvent>,
        inbound_sessions: mpsc::Receiver<ChatSession>,
    ) -> Self {
        let mut state = AppState::new(client.nickname());
        state.set_roster(roster);
        Self {
            state,
            client,
            timing,
            sessions: HashMap::new(),
            event_sender,
            event_receiver,
            inbound_sessions,
        }
    }

    /// Runs until `/quit` or end of input, then closes every chat and
    /// deregisters from the node master.
    pub async fn run<I>(mut self, input: I)
    where
        I: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.print(&format!(
            "Logged in as {}. Type /help for commands.",
            self.state.nickname
        ));
        self.print_roster();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("Failed to read console input: {err}");
                        break;
                    }
                },
                Some(event) = self.event_receiver.recv() => self.handle_network_event(event),
                Some(session) = self.inbound_sessions.recv() => self.adopt(session).await,
            }
        }

        self.shutdown().await;
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerOnline(peer) => {
                self.print(&format!("* {peer} is online"));
                self.state.add_peer(peer);
            }
            NetworkEvent::PeerOffline(nickname) => {
                if self.state.remove_peer(&nickname) {
                    self.print(&format!("* {nickname} went offline"));
                }
            }
            NetworkEvent::RegistryLost => {
                self.state.registry_lost();
                self.print("* Lost connection with the node master; the peer list is stale");
            }
            NetworkEvent::ChatOpened(nickname) => {
                self.print(&format!("* Chat with {nickname} opened"));
                self.state.open_chat(&nickname);
            }
            NetworkEvent::MessageReceived(line) => {
                self.print(&format_line(&line));
                self.state.push_message(line);
            }
            NetworkEvent::ChatPeerLeft(nickname) => {
                self.forget_chat(&nickname, "left the chat");
            }
            NetworkEvent::ChatDisconnected(nickname) => {
                self.forget_chat(&nickname, "disconnected");
            }
        }
    }

    /// Returns `false` when the user wants to leave.
    async fn handle_line(&mut self, line: &str) -> bool {
        let Some(command) = UserCommand::parse(line) else {
            if !line.trim().is_empty() {
                self.print("Unknown command. Type /help for commands.");
            }
            return true;
        };

        match command {
            UserCommand::ListPeers => self.print_roster(),
            UserCommand::OpenChat { nickname } => {
                self.open_chat(&nickname).await;
            }
            UserCommand::SendTo { nickname, text } => {
                if self.open_chat(&nickname).await {
                    self.send(&nickname, &text).await;
                }
            }
            UserCommand::Say(text) => match self.state.current_chat().map(str::to_string) {
                Some(nickname) => self.send(&nickname, &text).await,
                None => self.print("No open chat. Use /chat <nickname> first."),
            },
            UserCommand::CloseChat { nickname } => match self.sessions.remove(&nickname) {
                Some(session) => {
                    session.close().await;
                    self.state.close_chat(&nickname, "closed by us");
                    self.print(&format!("* Chat with {nickname} closed"));
                }
                None => self.print(&format!("No open chat with {nickname}.")),
            },
            UserCommand::History => {
                for line in self.state.recent_messages(HISTORY_LINES) {
                    self.print(&format_line(line));
                }
            }
            UserCommand::Debug => {
                for event in self.state.recent_debug_events(HISTORY_LINES) {
                    self.print(&format_debug_event(event));
                }
            }
            UserCommand::Help => self.print(HELP),
            UserCommand::Quit => return false,
        }
        true
    }

    /// Makes sure a live chat with `nickname` exists. Returns whether one does.
    async fn open_chat(&mut self, nickname: &str) -> bool {
        if nickname == self.state.nickname {
            self.print("That is you.");
            return false;
        }
        if self.sessions.get(nickname).is_some_and(ChatSession::is_open) {
            self.state.open_chat(nickname);
            return true;
        }

        let Some(peer) = self.client.find(nickname).await else {
            match self.state.get_time_since_last_seen(nickname) {
                Some(seconds) => self.print(&format!(
                    "{nickname} is not online (last seen {seconds:.0}s ago)."
                )),
                None => self.print(&format!("{nickname} is not online.")),
            }
            return false;
        };

        match ChatSession::connect(
            &self.state.nickname,
            &peer,
            self.timing,
            self.event_sender.clone(),
        )
        .await
        {
            Ok(session) => {
                self.state.open_chat(nickname);
                if let Some(stale) = self.sessions.insert(nickname.to_string(), session) {
                    stale.close().await;
                }
                true
            }
            Err(err) => {
                log::warn!("Could not open chat with {nickname}: {err}");
                self.print(&format!("Could not reach {nickname}: {err}"));
                false
            }
        }
    }

    async fn send(&mut self, nickname: &str, text: &str) {
        let Some(session) = self.sessions.get(nickname) else {
            self.print(&format!("No open chat with {nickname}."));
            return;
        };
        match session.send(text).await {
            Ok(()) => self.state.push_own_message(nickname, text),
            Err(err) => self.print(&format!("Message not sent: {err}")),
        }
    }

    /// An inbound chat replaces whatever we had with the same partner.
    async fn adopt(&mut self, session: ChatSession) {
        let nickname = session.remote_nickname().to_string();
        if let Some(stale) = self.sessions.insert(nickname, session) {
            stale.close().await;
        }
    }

    fn forget_chat(&mut self, nickname: &str, reason: &str) {
        // Only a dead session is dropped; a replacement may already be open.
        if self
            .sessions
            .get(nickname)
            .is_some_and(|session| !session.is_open())
        {
            self.sessions.remove(nickname);
        }
        if self.state.close_chat(nickname, reason) {
            self.print(&format!("* {nickname} {reason}"));
        }
    }

    fn print_roster(&self) {
        if !self.state.registry_connected {
            self.print("(not connected to the node master; this list may be stale)");
        }
        if self.state.peers.is_empty() {
            self.print("Nobody else is online.");
            return;
        }
        self.print("Online:");
        for peer in &self.state.peers {
            let marker = if self.sessions.contains_key(&peer.nickname) {
                " (chatting)"
            } else {
                ""
            };
            self.print(&format!("  {peer} @ {}{marker}", peer.address()));
        }
    }

    fn print(&self, text: &str) {
        println!("{text}");
    }

    async fn shutdown(mut self) {
        for (nickname, session) in self.sessions.drain() {
            log::debug!("Closing chat with {nickname}");
            session.close().await;
        }
        self.client.disconnect().await;
    }
}
