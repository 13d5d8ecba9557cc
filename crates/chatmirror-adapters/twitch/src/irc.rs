//! IRCv3 line parsing for Twitch chat.
//!
//! Twitch speaks a subset of IRC with message tags:
//!
//! ```text
//! @badges=;display-name=Ann;user-id=1 :ann_1!ann_1@ann_1.tmi.twitch.tv PRIVMSG #chan1 :hi
//! └──────────── tags ─────────────┘ └──────── prefix ─────────────┘ └command┘ └params┘
//! ```

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrcParseError {
    /// The line was empty after trimming.
    #[error("empty IRC line")]
    Empty,

    /// Tags or prefix were not followed by a command.
    #[error("IRC line has no command: {0}")]
    MissingCommand(String),
}

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcMessage {
    /// IRCv3 tags with unescaped values.
    pub tags: HashMap<String, String>,
    /// Source prefix without the leading `:`.
    pub prefix: Option<String>,
    /// Command or numeric reply.
    pub command: String,
    /// Parameters; the trailing parameter (if any) is last.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parses a single line (trailing CR/LF are ignored).
    pub fn parse(line: &str) -> Result<Self, IrcParseError> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return Err(IrcParseError::Empty);
        }

        let mut message = IrcMessage::default();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (tags, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            message.tags = parse_tags(tags);
            rest = tail.trim_start_matches(' ');
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            message.prefix = Some(prefix.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(IrcParseError::MissingCommand(line.to_string()));
        }
        message.command = command.to_string();

        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                message.params.push(trailing.to_string());
                break;
            }
            let (param, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            message.params.push(param.to_string());
            rest = tail;
        }

        Ok(message)
    }

    /// Returns a tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the nick part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        Some(nick)
    }

    /// Returns the last parameter.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

impl FromStr for IrcMessage {
    type Err = IrcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag_value(value)),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Reverses IRCv3 tag value escaping.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // a lone trailing backslash is dropped
            None => {}
        }
    }
    out
}

// =============================================================================
// Twitch events
// =============================================================================

/// Twitch-relevant meaning of an IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwitchEvent {
    /// Server keep-alive; must be answered with `PONG`.
    Ping(String),
    /// `001` welcome: login accepted.
    Welcome,
    /// Login was refused.
    AuthFailed(String),
    /// Server is about to restart; reconnect.
    Reconnect,
    /// A chat message.
    Privmsg {
        /// Channel without the leading `#`.
        channel: String,
        /// `display-name` tag, possibly empty.
        display_name: String,
        /// Login taken from the prefix nick.
        login: String,
        /// Message body.
        text: String,
    },
    /// Anything else.
    Other,
}

const AUTH_FAILURE_NOTICES: [&str; 2] = ["Login authentication failed", "Improperly formatted auth"];

impl From<&IrcMessage> for TwitchEvent {
    fn from(msg: &IrcMessage) -> Self {
        match msg.command.as_str() {
            "PING" => Self::Ping(msg.trailing().unwrap_or("tmi.twitch.tv").to_string()),
            "001" => Self::Welcome,
            "RECONNECT" => Self::Reconnect,
            "NOTICE" => {
                let text = msg.trailing().unwrap_or_default();
                if AUTH_FAILURE_NOTICES.iter().any(|n| text.contains(n)) {
                    Self::AuthFailed(text.to_string())
                } else {
                    Self::Other
                }
            }
            "PRIVMSG" if msg.params.len() >= 2 => {
                let channel = msg.params[0].trim_start_matches('#').to_string();
                let text = unwrap_action(msg.trailing().unwrap_or_default());
                Self::Privmsg {
                    channel,
                    display_name: msg.tag("display-name").unwrap_or_default().to_string(),
                    login: msg.nick().unwrap_or_default().to_string(),
                    text: text.to_string(),
                }
            }
            _ => Self::Other,
        }
    }
}

/// Strips CTCP `ACTION` framing used by `/me` messages.
fn unwrap_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .map(|t| t.strip_suffix('\u{1}').unwrap_or(t))
        .unwrap_or(text)
}

/// Builds the frame that posts `text` to `channel`.
pub fn privmsg(channel: &str, text: &str) -> String {
    format!("PRIVMSG #{channel} :{text}")
}
