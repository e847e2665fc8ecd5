//! Text wire protocol spoken between peers and the node master, and between
//! two chatting peers.
//!
//! There is no length prefix on these frames: one read on the receiving side
//! is one message (see [`crate::network::transport`]).

use crate::common::types::PeerRecord;
use crate::error::ProtocolError;

pub const DEFAULT_NODEMASTER_PORT: u16 = 60514;

pub const MAX_NICKNAME_LEN: usize = 40;
pub const MAX_PORT_LEN: usize = 5;
/// `"<nickname> <port>"`
pub const MAX_REGISTRATION_LEN: usize = MAX_NICKNAME_LEN + 1 + MAX_PORT_LEN;
pub const MAX_MESSAGE_LEN: usize = 140;

pub const QUIT: &str = "/quit";
pub const KEEP_ALIVE: &str = "KEEPALIVE";
pub const ERROR_PREFIX: &str = "ERROR ";
pub const ONLINE_PREFIX: &str = "ONL ";
pub const OFFLINE_PREFIX: &str = "OFL ";
pub const TOO_LONG_WARNING: &str = "Message received too long. Max is 140 characters.";

pub const FIELD_SEPARATOR: char = ';';
pub const ROSTER_SEPARATOR: char = '&';

/// Nicknames travel inside `;`/`&`-separated and space-separated frames, so
/// none of those may appear in one.
pub fn is_valid_nickname(nickname: &str) -> bool {
    !nickname.is_empty()
        && nickname.len() <= MAX_NICKNAME_LEN
        && !nickname.contains([FIELD_SEPARATOR, ROSTER_SEPARATOR, ' '])
}

pub fn is_quit(frame: &str) -> bool {
    frame.eq_ignore_ascii_case(QUIT)
}

/// Drops `KEEPALIVE` runs at either end of a frame. Several keep-alives, or
/// one stuck to a message, can come back from a single read.
pub fn strip_keep_alives(frame: &str) -> &str {
    let mut text = frame;
    while let Some(rest) = text.strip_prefix(KEEP_ALIVE) {
        text = rest;
    }
    while let Some(rest) = text.strip_suffix(KEEP_ALIVE) {
        text = rest;
    }
    text
}

/// A parsed `"<nickname> <port>"` registration frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nickname: String,
    pub port: u16,
}

pub fn encode_registration(nickname: &str, port: u16) -> String {
    format!("{nickname} {port}")
}

pub fn parse_registration(frame: &str) -> Result<Registration, ProtocolError> {
    if frame.len() > MAX_REGISTRATION_LEN {
        return Err(ProtocolError::RegistrationTooLong);
    }

    let mut fields = frame.trim().split(' ').filter(|field| !field.is_empty());
    let (Some(nickname), Some(port)) = (fields.next(), fields.next()) else {
        return Err(ProtocolError::MissingFields);
    };

    if nickname.len() > MAX_NICKNAME_LEN {
        return Err(ProtocolError::RegistrationTooLong);
    }
    if !is_valid_nickname(nickname) {
        return Err(ProtocolError::InvalidNickname(nickname.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| ProtocolError::InvalidPort(port.to_string()))?;

    Ok(Registration {
        nickname: nickname.to_string(),
        port,
    })
}

/// Every entry is terminated by `&`, so the empty roster is the single byte
/// `&` and never a zero-length write.
pub fn encode_roster(peers: &[PeerRecord]) -> String {
    if peers.is_empty() {
        return ROSTER_SEPARATOR.to_string();
    }
    peers
        .iter()
        .map(|peer| format!("{}{ROSTER_SEPARATOR}", peer.to_wire()))
        .collect()
}

/// Accepts both `&`-terminated and plain `&`-joined entries.
pub fn parse_roster(frame: &str) -> Result<Vec<PeerRecord>, ProtocolError> {
    frame
        .trim()
        .split(ROSTER_SEPARATOR)
        .filter(|entry| !entry.is_empty())
        .map(PeerRecord::from_wire)
        .collect()
}

pub fn encode_error(reason: &str) -> String {
    format!("{ERROR_PREFIX}{reason}")
}

/// The reason carried by an `ERROR` frame, if this is one.
pub fn error_reason(frame: &str) -> Option<&str> {
    frame
        .strip_prefix(ERROR_PREFIX)
        .or_else(|| (frame == ERROR_PREFIX.trim_end()).then_some(""))
}

/// Splits the node master's first reply into the roster and whatever
/// `ONL`/`OFL` frames arrived behind it in the same read.
pub fn split_roster_reply(frame: &str) -> (&str, &str) {
    let start = [ONLINE_PREFIX, OFFLINE_PREFIX]
        .iter()
        .filter_map(|prefix| frame.find(prefix))
        .min()
        .unwrap_or(frame.len());
    frame.split_at(start)
}

/// Splits a read that may hold several `ONL`/`OFL` frames back to back.
/// Nicknames never contain a space, so a prefix can only start a frame.
pub fn split_events(frame: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = frame
        .match_indices(ONLINE_PREFIX)
        .chain(frame.match_indices(OFFLINE_PREFIX))
        .map(|(index, _)| index)
        .collect();
    starts.sort_unstable();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut frames = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(frame.len());
        let piece = frame[start..end].trim();
        if !piece.is_empty() {
            frames.push(piece);
        }
    }
    frames
}

/// Roster change pushed by the node master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Online(PeerRecord),
    Offline(String),
}

impl RegistryEvent {
    pub fn encode(&self) -> String {
        match self {
            RegistryEvent::Online(peer) => format!("{ONLINE_PREFIX}{}", peer.to_wire()),
            RegistryEvent::Offline(nickname) => format!("{OFFLINE_PREFIX}{nickname}"),
        }
    }

    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        if let Some(entry) = frame.strip_prefix(ONLINE_PREFIX) {
            return PeerRecord::from_wire(entry.trim()).map(RegistryEvent::Online);
        }
        if let Some(nickname) = frame.strip_prefix(OFFLINE_PREFIX) {
            let nickname = nickname.trim();
            if is_valid_nickname(nickname) {
                return Ok(RegistryEvent::Offline(nickname.to_string()));
            }
        }
        Err(ProtocolError::MalformedEvent(frame.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_parsing() {
        assert_eq!(
            parse_registration("alice 40001"),
            Ok(Registration {
                nickname: "alice".into(),
                port: 40001
            })
        );
        assert_eq!(
            parse_registration("alice"),
            Err(ProtocolError::MissingFields)
        );
        assert_eq!(
            parse_registration("alice port"),
            Err(ProtocolError::InvalidPort("port".into()))
        );
        assert_eq!(
            parse_registration("ali;ce 40001"),
            Err(ProtocolError::InvalidNickname("ali;ce".into()))
        );

        let long_name = "x".repeat(MAX_NICKNAME_LEN + 1);
        assert_eq!(
            parse_registration(&format!("{long_name} 1")),
            Err(ProtocolError::RegistrationTooLong)
        );
        assert_eq!(
            parse_registration(&"y".repeat(MAX_REGISTRATION_LEN + 1)),
            Err(ProtocolError::RegistrationTooLong)
        );
    }

    #[test]
    fn roster_encoding() {
        assert_eq!(encode_roster(&[]), "&");
        assert_eq!(parse_roster("&").unwrap(), Vec::new());
        assert_eq!(parse_roster("").unwrap(), Vec::new());

        let peers = vec![
            PeerRecord::new("alice", "10.0.0.1", 40001),
            PeerRecord::new("bob", "10.0.0.2", 40002),
        ];
        let frame = encode_roster(&peers);
        assert_eq!(frame, "alice;10.0.0.1;40001&bob;10.0.0.2;40002&");
        assert_eq!(parse_roster(&frame).unwrap(), peers);
        assert_eq!(
            parse_roster("alice;10.0.0.1;40001&bob;10.0.0.2;40002").unwrap(),
            peers
        );
    }

    #[test]
    fn registry_events() {
        let online = RegistryEvent::Online(PeerRecord::new("bob", "10.0.0.2", 40002));
        assert_eq!(online.encode(), "ONL bob;10.0.0.2;40002");
        assert_eq!(RegistryEvent::parse("ONL bob;10.0.0.2;40002"), Ok(online));
        assert_eq!(
            RegistryEvent::parse("OFL bob"),
            Ok(RegistryEvent::Offline("bob".into()))
        );
        assert!(RegistryEvent::parse("HELLO").is_err());
        assert!(RegistryEvent::parse("OFL ").is_err());
    }

    #[test]
    fn error_frames() {
        assert_eq!(error_reason("ERROR Nickname taken"), Some("Nickname taken"));
        assert_eq!(error_reason("ERROR"), Some(""));
        assert_eq!(error_reason("alice;h;1&"), None);
        assert_eq!(encode_error("boom"), "ERROR boom");
    }

    #[test]
    fn keep_alives_are_stripped_from_both_ends() {
        assert_eq!(strip_keep_alives("KEEPALIVE"), "");
        assert_eq!(strip_keep_alives("KEEPALIVEKEEPALIVE"), "");
        assert_eq!(strip_keep_alives("KEEPALIVEhelloKEEPALIVE"), "hello");
        assert_eq!(strip_keep_alives("hello"), "hello");
        assert_eq!(strip_keep_alives("KEEPALIVE/quit"), "/quit");
        assert_eq!(strip_keep_alives("say KEEPALIVE twice"), "say KEEPALIVE twice");
    }

    #[test]
    fn roster_reply_with_trailing_events() {
        let (roster, rest) = split_roster_reply("alice;h;1&ONL bob;h;2OFL alice");
        assert_eq!(roster, "alice;h;1&");
        assert_eq!(split_events(rest), vec!["ONL bob;h;2", "OFL alice"]);

        assert_eq!(split_roster_reply("&"), ("&", ""));
        assert_eq!(split_roster_reply("&OFL x"), ("&", "OFL x"));
        assert!(split_events("").is_empty());
        assert_eq!(split_events("ONL bob;h;2"), vec!["ONL bob;h;2"]);
        assert_eq!(split_events("junkOFL x"), vec!["junk", "OFL x"]);
    }

    #[test]
    fn quit_is_case_insensitive() {
        assert!(is_quit("/quit"));
        assert!(is_quit("/QUIT"));
        assert!(!is_quit("/quit now"));
    }
}
