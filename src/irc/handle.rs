use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::message::Command;
use crate::util::{split_for_wire, strip_control_chars};

/// Room left in a 512-byte line for the `nick!user@host` prefix the server
/// prepends when relaying our messages.
const RELAY_PREFIX_ALLOWANCE: usize = 100;

#[derive(Debug, Error)]
#[error("session {0} is closed")]
pub struct SessionClosed(pub u64);

/// Sending side of one live, registered IRC session.
///
/// Clones share the session's outbound queue. Once the session's connection
/// ends, every clone reports `is_live() == false` and sends fail with
/// [`SessionClosed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    nickname: String,
    channel: String,
    outbound: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn new(
        id: u64,
        nickname: impl Into<String>,
        channel: impl Into<String>,
        outbound: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                nickname: nickname.into(),
                channel: channel.into(),
                outbound,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn nickname(&self) -> &str {
        &self.inner.nickname
    }

    /// The channel this session joined.
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn is_live(&self) -> bool {
        !self.inner.outbound.is_closed()
    }

    /// Queue a raw command.
    pub fn send(&self, command: Command) -> Result<(), SessionClosed> {
        self.inner
            .outbound
            .send(command)
            .map_err(|_| SessionClosed(self.inner.id))
    }

    /// Send `text` to `target`, one PRIVMSG per line, splitting lines that
    /// would overflow the wire limit.
    pub fn msg(&self, target: &str, text: &str) -> Result<(), SessionClosed> {
        let clean = strip_control_chars(text);
        for chunk in split_for_wire(&clean, text_budget(target)) {
            self.send(Command::privmsg(target, chunk))?;
        }
        Ok(())
    }

    /// Send `text` to the session's channel.
    pub fn say(&self, text: &str) -> Result<(), SessionClosed> {
        self.msg(self.channel(), text)
    }
}

fn text_budget(target: &str) -> usize {
    // "PRIVMSG <target> :<text>\r\n"
    let overhead = "PRIVMSG ".len() + target.len() + " :".len() + "\r\n".len();
    super::codec::MAX_OUTBOUND_LINE
        .saturating_sub(overhead)
        .saturating_sub(RELAY_PREFIX_ALLOWANCE)
}
