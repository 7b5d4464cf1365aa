//! IRC message parsing and outbound command serialization.
//!
//! Inbound lines are parsed into a loose [`Message`] (tags, prefix, command,
//! params) without interpreting the command. Outbound traffic is built from
//! the closed [`Command`] set this bot actually sends.

use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// A parsed inbound IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw IRCv3 tag string without the leading `@`.
    pub tags: Option<String>,
    /// Source prefix without the leading `:` (`nick!user@host` or a server name).
    pub prefix: Option<String>,
    /// Command verb or three-digit numeric, uppercased.
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl Message {
    /// Nickname part of the prefix, if the message came from a user.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        if nick.is_empty() {
            None
        } else {
            Some(nick)
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last param, which for PRIVMSG/NOTICE/PING is the payload.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }

        let tags = match rest.strip_prefix('@') {
            Some(tagged) => {
                let (tags, after) = tagged.split_once(' ').unwrap_or((tagged, ""));
                rest = after.trim_start_matches(' ');
                Some(tags.to_string())
            }
            None => None,
        };

        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (prefix, after) = prefixed.split_once(' ').unwrap_or((prefixed, ""));
                rest = after.trim_start_matches(' ');
                Some(prefix.to_string())
            }
            None => None,
        };

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ProtocolError::MissingCommand(line.to_string()));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((middle, after)) => {
                    params.push(middle.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

/// Commands the bot sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick(String),
    User { username: String, realname: String },
    Join(String),
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Ping(String),
    Pong(String),
}

impl Command {
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Command::Privmsg {
            target: target.into(),
            text: text.into(),
        }
    }

    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Self {
        Command::Notice {
            target: target.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Nick(nick) => write!(f, "NICK {nick}"),
            Command::User { username, realname } => write!(f, "USER {username} 0 * :{realname}"),
            Command::Join(channel) => write!(f, "JOIN {channel}"),
            Command::Privmsg { target, text } => write!(f, "PRIVMSG {target} :{text}"),
            Command::Notice { target, text } => write!(f, "NOTICE {target} :{text}"),
            Command::Ping(token) => write!(f, "PING :{token}"),
            Command::Pong(token) => write!(f, "PONG :{token}"),
        }
    }
}
