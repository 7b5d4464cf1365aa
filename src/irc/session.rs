//! One IRC connection, from registration to disconnect.
//!
//! A [`ProtocolSession`] owns the transport for its whole life. Its event
//! loop multiplexes three sources: inbound lines, the outbound queue that
//! [`SessionHandle`]s feed, and the liveness timer. Everything slow (status
//! lookups, command handlers) is spawned off so the loop only ever waits on
//! those three.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;

use super::codec::LineCodec;
use super::ctcp::{self, CtcpInfo};
use super::factory::SessionFactory;
use super::handle::SessionHandle;
use super::message::{Command, Message};
use super::{ProtocolError, SessionError};
use crate::chat::{ButtifyCooldown, ChatRouter, Routed};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_OUTSTANDING_PINGS: u32 = 5;

/// Token carried by our own liveness PINGs.
const LIVENESS_TOKEN: &str = "theresa-liveness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Disconnected,
}

/// Identity and timing for every session the factory starts.
#[derive(Clone)]
pub struct SessionConfig {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub channel: String,
    pub nickserv_password: Option<SecretString>,
    pub ping_interval: Duration,
    pub max_outstanding_pings: u32,
    pub ctcp: CtcpInfo,
}

impl SessionConfig {
    pub fn new(nickname: impl Into<String>, channel: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            username: nickname.clone(),
            realname: nickname.clone(),
            nickname,
            channel: channel.into(),
            nickserv_password: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_outstanding_pings: DEFAULT_MAX_OUTSTANDING_PINGS,
            ctcp: CtcpInfo::default(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("nickname", &self.nickname)
            .field("username", &self.username)
            .field("realname", &self.realname)
            .field("channel", &self.channel)
            .field(
                "nickserv_password",
                &self.nickserv_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("ping_interval", &self.ping_interval)
            .field("max_outstanding_pings", &self.max_outstanding_pings)
            .finish_non_exhaustive()
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum DisconnectReason {
    ClosedByPeer,
    LivenessExhausted { outstanding: u32 },
    Failed(SessionError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClosedByPeer => f.write_str("connection closed by server"),
            DisconnectReason::LivenessExhausted { outstanding } => {
                write!(f, "{outstanding} liveness probes went unanswered")
            }
            DisconnectReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl From<SessionError> for DisconnectReason {
    fn from(e: SessionError) -> Self {
        DisconnectReason::Failed(e)
    }
}

pub struct ProtocolSession {
    id: u64,
    config: Arc<SessionConfig>,
    factory: Arc<SessionFactory>,
    router: Arc<ChatRouter>,
    state: SessionState,
    nickname: String,
    outstanding_pings: u32,
    cooldown: ButtifyCooldown,
    handle: Option<SessionHandle>,
}

impl ProtocolSession {
    pub fn new(
        id: u64,
        config: Arc<SessionConfig>,
        factory: Arc<SessionFactory>,
        router: Arc<ChatRouter>,
    ) -> Self {
        Self {
            id,
            nickname: config.nickname.clone(),
            config,
            factory,
            router,
            state: SessionState::Connecting,
            outstanding_pings: 0,
            cooldown: ButtifyCooldown::default(),
            handle: None,
        }
    }

    /// Drive the session over `io` until it ends.
    ///
    /// Liveness probing starts as soon as registration is sent, so a server
    /// that accepts the connection and then says nothing is dropped like any
    /// other unresponsive peer. However the session ends, the factory is told
    /// via [`SessionFactory::unestablished`] before this returns.
    pub async fn run<T>(mut self, io: T) -> DisconnectReason
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, LineCodec::new());
        let (outbound, mut queue) = mpsc::unbounded_channel::<Command>();
        let mut undelivered = Vec::new();

        let reason: DisconnectReason = match self.register(&mut framed).await {
            Err(e) => e.into(),
            Ok(()) => {
                let mut liveness = self.liveness_timer();
                loop {
                    tokio::select! {
                        inbound = framed.next() => {
                            let line = match inbound {
                                Some(Ok(line)) => line,
                                Some(Err(e)) => break SessionError::from(e).into(),
                                None => break DisconnectReason::ClosedByPeer,
                            };
                            tracing::trace!(session = self.id, line = %line, "Received");
                            match line.parse::<Message>() {
                                Ok(message) => self.handle_message(&message, &outbound),
                                Err(e) => tracing::debug!(session = self.id, error = %e, "Ignoring malformed line"),
                            }
                        }
                        Some(command) = queue.recv() => {
                            if let Err(e) = self.write(&mut framed, &command).await {
                                undelivered.push(command);
                                break e.into();
                            }
                        }
                        _ = liveness.tick() => {
                            if let Err(reason) = self.probe(&mut framed).await {
                                break reason;
                            }
                        }
                    }
                }
            }
        };

        queue.close();
        while let Ok(command) = queue.try_recv() {
            undelivered.push(command);
        }
        self.disconnect(&reason, undelivered);
        reason
    }

    async fn register<T>(&mut self, framed: &mut Framed<T, LineCodec>) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(SessionState::Handshaking);
        self.write(framed, &Command::Nick(self.nickname.clone())).await?;
        self.write(
            framed,
            &Command::User {
                username: self.config.username.clone(),
                realname: self.config.realname.clone(),
            },
        )
        .await
    }

    /// Write one command. Lines the codec refuses are logged and dropped;
    /// only transport failures end the session.
    async fn write<T>(
        &self,
        framed: &mut Framed<T, LineCodec>,
        command: &Command,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        match framed.send(command.to_string()).await {
            Ok(()) => Ok(()),
            Err(e @ ProtocolError::Io(_)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "Dropping unsendable line");
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, message: &Message, outbound: &mpsc::UnboundedSender<Command>) {
        match message.command.as_str() {
            "001" => self.on_welcome(message, outbound),
            "433" if self.state == SessionState::Handshaking => {
                self.nickname.push('_');
                tracing::info!(session = self.id, nick = %self.nickname, "Nickname in use, retrying");
                let _ = outbound.send(Command::Nick(self.nickname.clone()));
            }
            "PING" => {
                let token = message.trailing().unwrap_or_default();
                let _ = outbound.send(Command::Pong(token.to_string()));
            }
            "PONG" => {
                self.outstanding_pings = self.outstanding_pings.saturating_sub(1);
            }
            "PRIVMSG" => self.on_privmsg(message, outbound),
            "ERROR" => {
                tracing::warn!(
                    session = self.id,
                    message = message.trailing().unwrap_or_default(),
                    "Server error"
                );
            }
            _ => {}
        }
    }

    fn on_welcome(&mut self, message: &Message, outbound: &mpsc::UnboundedSender<Command>) {
        if self.state != SessionState::Handshaking {
            return;
        }
        if let Some(nick) = message.param(0).filter(|n| !n.is_empty()) {
            self.nickname = nick.to_string();
        }

        let handle = SessionHandle::new(
            self.id,
            self.nickname.as_str(),
            self.config.channel.as_str(),
            outbound.clone(),
        );
        self.transition(SessionState::Ready);
        self.factory.established(handle.clone());

        if let Some(password) = &self.config.nickserv_password {
            let _ = outbound.send(Command::privmsg(
                "NickServ",
                format!("identify {}", password.expose_secret()),
            ));
        }
        let _ = outbound.send(Command::Join(self.config.channel.clone()));
        for command in self.factory.take_undelivered() {
            let _ = outbound.send(command);
        }
        self.handle = Some(handle);
    }

    fn on_privmsg(&mut self, message: &Message, outbound: &mpsc::UnboundedSender<Command>) {
        if message.params.len() < 2 {
            return;
        }
        let (Some(target), Some(body)) = (message.param(0), message.trailing()) else {
            return;
        };
        let sender = message.source_nick().unwrap_or_default();

        let extracted = ctcp::extract(body);
        for query in &extracted.queries {
            tracing::debug!(session = self.id, from = %sender, tag = %query.tag, "CTCP query");
            if sender.is_empty() {
                continue;
            }
            if let Some(reply) = ctcp::reply(query, &self.config.ctcp) {
                let _ = outbound.send(Command::notice(sender, reply));
            }
        }

        if !target.starts_with('#') || extracted.text.is_empty() {
            return;
        }
        let Some(handle) = self.handle.clone() else {
            return;
        };

        if self.router.route(&handle, target, &extracted.text) == Routed::Chatter {
            if let Some(banter) = self.router.banter() {
                let reply = banter.respond(
                    &mut self.cooldown,
                    &extracted.text,
                    Instant::now(),
                    &mut rand::thread_rng(),
                );
                if let Some(reply) = reply {
                    let _ = handle.msg(target, &reply);
                }
            }
        }
    }

    fn liveness_timer(&self) -> Interval {
        let period = self.config.ping_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    /// Send a liveness PING; give up once too many are unanswered.
    async fn probe<T>(&mut self, framed: &mut Framed<T, LineCodec>) -> Result<(), DisconnectReason>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.write(framed, &Command::Ping(LIVENESS_TOKEN.to_string()))
            .await?;
        self.outstanding_pings += 1;

        if self.outstanding_pings > self.config.max_outstanding_pings {
            tracing::warn!(
                session = self.id,
                outstanding = self.outstanding_pings,
                "Server stopped answering, dropping connection"
            );
            return Err(DisconnectReason::LivenessExhausted {
                outstanding: self.outstanding_pings,
            });
        }
        Ok(())
    }

    /// Channel lines that never reached the wire are handed to the factory
    /// for the next session. Protocol chatter is not worth replaying.
    fn disconnect(&mut self, reason: &DisconnectReason, undelivered: Vec<Command>) {
        let was_ready = self.state == SessionState::Ready;
        self.transition(SessionState::Disconnected);
        self.handle = None;
        tracing::debug!(session = self.id, was_ready, reason = %reason, "Session ended");

        let channel = self.config.channel.as_str();
        let replay: Vec<Command> = undelivered
            .into_iter()
            .filter(|command| matches!(command, Command::Privmsg { target, .. } if target == channel))
            .collect();
        self.factory.defer_undelivered(replay);
        self.factory.unestablished();
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}
