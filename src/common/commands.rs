/// Lệnh người dùng gõ trên console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Print the roster.
    ListPeers,
    /// Open a direct chat with an online peer.
    OpenChat { nickname: String },
    /// Send text to a specific chat partner.
    SendTo { nickname: String, text: String },
    /// Plain text, sent to the most recently opened chat.
    Say(String),
    CloseChat { nickname: String },
    /// Print the latest chat lines, ours included.
    History,
    /// Print the latest network events.
    Debug,
    Help,
    Quit,
}

impl UserCommand {
    /// Returns `None` for blank lines and for commands missing an argument.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(UserCommand::Say(line.to_string()));
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "/list" => Some(UserCommand::ListPeers),
            "/help" => Some(UserCommand::Help),
            "/history" => Some(UserCommand::History),
            "/debug" => Some(UserCommand::Debug),
            "/quit" => Some(UserCommand::Quit),
            "/chat" if !rest.is_empty() => Some(UserCommand::OpenChat {
                nickname: rest.to_string(),
            }),
            "/close" if !rest.is_empty() => Some(UserCommand::CloseChat {
                nickname: rest.to_string(),
            }),
            "/msg" => {
                let (nickname, text) = rest.split_once(char::is_whitespace)?;
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(UserCommand::SendTo {
                    nickname: nickname.to_string(),
                    text: text.to_string(),
                })
            }
            _ => None,
        }
    }
}
