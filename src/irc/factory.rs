//! Session ownership and reconnect policy.
//!
//! [`SessionFactory`] holds the single live [`SessionHandle`] and a
//! [`PendingSession`] that resolves when the next session registers. Other
//! components never keep a session around; they ask the factory each time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use super::handle::SessionHandle;
use super::message::Command;
use super::session::{ProtocolSession, SessionConfig};
use super::SessionError;
use crate::chat::ChatRouter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
#[error("session factory shut down before a session was established")]
pub struct FactoryClosed;

/// Resolves to the next session that completes registration.
///
/// Every clone observes the same resolution. Once resolved it stays resolved;
/// the factory installs a fresh one for the following connection.
#[derive(Clone)]
pub struct PendingSession {
    inner: Shared<oneshot::Receiver<SessionHandle>>,
}

impl PendingSession {
    fn new() -> (oneshot::Sender<SessionHandle>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { inner: rx.shared() })
    }

    pub async fn wait(self) -> Result<SessionHandle, FactoryClosed> {
        self.inner.await.map_err(|_| FactoryClosed)
    }
}

struct FactoryState {
    current: Option<SessionHandle>,
    pending: PendingSession,
    /// `None` once `pending` has been resolved.
    resolver: Option<oneshot::Sender<SessionHandle>>,
    /// Lines a dead session accepted but never wrote.
    undelivered: Vec<Command>,
}

impl FactoryState {
    /// Forget the current session and make sure an unresolved pending handle
    /// is outstanding.
    fn clear(&mut self) {
        self.current = None;
        if self.resolver.is_none() {
            let (resolver, pending) = PendingSession::new();
            self.resolver = Some(resolver);
            self.pending = pending;
        }
    }
}

/// Owner of the one live session and of the reconnect loop.
pub struct SessionFactory {
    state: Mutex<FactoryState>,
    backoff: Mutex<ReconnectPolicy>,
    next_session_id: AtomicU64,
}

impl SessionFactory {
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        let (resolver, pending) = PendingSession::new();
        Self {
            state: Mutex::new(FactoryState {
                current: None,
                pending,
                resolver: Some(resolver),
                undelivered: Vec::new(),
            }),
            backoff: Mutex::new(policy),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A session finished registration: it becomes current, every caller
    /// waiting in [`current_or_pending`](Self::current_or_pending) receives
    /// it, and reconnect backoff starts over.
    pub fn established(&self, session: SessionHandle) {
        let mut state = self.state.lock();
        tracing::info!(
            session = session.id(),
            nick = %session.nickname(),
            channel = %session.channel(),
            "Session established"
        );
        state.current = Some(session.clone());
        match state.resolver.take() {
            Some(resolver) => {
                // Err only means every waiter has gone away.
                let _ = resolver.send(session);
            }
            None => {
                // Previous session never reported its disconnect.
                let (resolver, pending) = PendingSession::new();
                let _ = resolver.send(session);
                state.pending = pending;
            }
        }
        drop(state);
        self.backoff.lock().reset();
    }

    /// The current session went away.
    ///
    /// A resolved pending handle is replaced by a fresh one. An unresolved
    /// handle is kept so callers already waiting on it are not stranded by a
    /// connection that dropped before registering.
    pub fn unestablished(&self) {
        let mut state = self.state.lock();
        if let Some(current) = &state.current {
            tracing::info!(session = current.id(), "Session lost");
        }
        state.clear();
    }

    /// Hand over lines a session queued but could not write before its
    /// connection ended. The next session sends them after joining.
    pub fn defer_undelivered(&self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        tracing::info!(lines = commands.len(), "Holding undelivered lines for the next session");
        self.state.lock().undelivered.extend(commands);
    }

    /// Take every line held by [`defer_undelivered`](Self::defer_undelivered).
    pub fn take_undelivered(&self) -> Vec<Command> {
        std::mem::take(&mut self.state.lock().undelivered)
    }

    /// The current session, or the next one to register.
    ///
    /// The wait is intentionally unbounded. It ends only with a new session
    /// or with the factory itself.
    pub async fn current_or_pending(&self) -> Result<SessionHandle, FactoryClosed> {
        let pending = {
            let mut state = self.state.lock();
            match &state.current {
                Some(current) if current.is_live() => return Ok(current.clone()),
                // Connection already gone but not yet reported; treat it as
                // reported so we wait for the replacement instead.
                Some(_) => state.clear(),
                None => {}
            }
            state.pending.clone()
        };
        pending.wait().await
    }

    /// The current session if one is live, without waiting.
    pub fn current(&self) -> Option<SessionHandle> {
        self.state
            .lock()
            .current
            .as_ref()
            .filter(|s| s.is_live())
            .cloned()
    }

    /// Connect, run a session to completion, back off, repeat. Never returns.
    pub async fn run(
        self: Arc<Self>,
        endpoint: Endpoint,
        config: Arc<SessionConfig>,
        router: Arc<ChatRouter>,
    ) {
        loop {
            tracing::info!(server = %endpoint, "Connecting");
            match connect(&endpoint).await {
                Ok(stream) => {
                    let session = ProtocolSession::new(
                        self.next_session_id(),
                        Arc::clone(&config),
                        Arc::clone(&self),
                        Arc::clone(&router),
                    );
                    let reason = session.run(stream).await;
                    tracing::warn!(server = %endpoint, reason = %reason, "Disconnected");
                }
                Err(e) => {
                    tracing::warn!(server = %endpoint, error = %e, "Could not connect");
                }
            }

            let delay = self.backoff.lock().next_delay(&mut rand::thread_rng());
            tracing::info!(delay_secs = delay.as_secs_f64(), "Reconnecting after delay");
            tokio::time::sleep(delay).await;
        }
    }
}

async fn connect(endpoint: &Endpoint) -> Result<TcpStream, SessionError> {
    let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| SessionError::ConnectTimeout(CONNECT_TIMEOUT))?
        .map_err(SessionError::Connect)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Where to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Exponential reconnect backoff with jitter.
///
/// Each retry multiplies the delay by `factor` (e) up to `max`, then
/// perturbs it by up to `jitter` of itself. A successful registration
/// resets the delay to `initial`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: f64,
    current_secs: f64,
    retries: u32,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter,
            current_secs: initial.as_secs_f64(),
            retries: 0,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.retries = self.retries.saturating_add(1);
        let max = self.max.as_secs_f64();
        self.current_secs = (self.current_secs * self.factor).min(max);

        let mut delay = self.current_secs;
        if self.jitter > 0.0 {
            let spread = delay * self.jitter;
            delay += rng.gen_range(-spread..=spread);
        }
        Duration::from_secs_f64(delay.clamp(0.0, max))
    }

    pub fn reset(&mut self) {
        self.current_secs = self.initial.as_secs_f64();
        self.retries = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(3600),
            std::f64::consts::E,
            0.119_626_565_582,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    fn session(id: u64) -> (SessionHandle, mpsc::UnboundedReceiver<crate::irc::Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(id, "theresa", "#mspa", tx), rx)
    }

    #[tokio::test]
    async fn test_current_returned_immediately() {
        let factory = SessionFactory::new();
        let (s, _rx) = session(1);
        factory.established(s);
        let got = factory.current_or_pending().await.unwrap();
        assert_eq!(got.id(), 1);
    }

    #[tokio::test]
    async fn test_waiters_resolved_together_on_establish() {
        let factory = Arc::new(SessionFactory::new());
        let a = tokio::spawn({
            let f = Arc::clone(&factory);
            async move { f.current_or_pending().await.map(|s| s.id()) }
        });
        let b = tokio::spawn({
            let f = Arc::clone(&factory);
            async move { f.current_or_pending().await.map(|s| s.id()) }
        });
        tokio::task::yield_now().await;

        let (s, _rx) = session(3);
        factory.established(s);
        assert_eq!(a.await.unwrap().unwrap(), 3);
        assert_eq!(b.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unestablished_installs_fresh_handle() {
        let factory = Arc::new(SessionFactory::new());
        let (first, _rx1) = session(1);
        factory.established(first);
        factory.unestablished();
        assert!(factory.current().is_none());

        let waiter = tokio::spawn({
            let f = Arc::clone(&factory);
            async move { f.current_or_pending().await.map(|s| s.id()) }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let (second, _rx2) = session(2);
        factory.established(second);
        assert_eq!(waiter.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drop_before_registration_keeps_waiters() {
        let factory = Arc::new(SessionFactory::new());
        let waiter = tokio::spawn({
            let f = Arc::clone(&factory);
            async move { f.current_or_pending().await.map(|s| s.id()) }
        });
        tokio::task::yield_now().await;

        // A connection that never registered still reports its disconnect.
        factory.unestablished();
        let (s, _rx) = session(5);
        factory.established(s);
        assert_eq!(waiter.await.unwrap().unwrap(), 5);
    }

    #[test]
    fn test_undelivered_lines_taken_once() {
        let factory = SessionFactory::new();
        factory.defer_undelivered(vec![Command::privmsg("#mspa", "Page 2")]);
        factory.defer_undelivered(vec![Command::privmsg("#mspa", "new: 1 pages")]);

        assert_eq!(
            factory.take_undelivered(),
            vec![
                Command::privmsg("#mspa", "Page 2"),
                Command::privmsg("#mspa", "new: 1 pages"),
            ]
        );
        assert!(factory.take_undelivered().is_empty());
    }

    #[tokio::test]
    async fn test_dead_current_session_is_not_handed_out() {
        let factory = Arc::new(SessionFactory::new());
        let (s, rx) = session(1);
        factory.established(s);
        drop(rx);

        let waiter = tokio::spawn({
            let f = Arc::clone(&factory);
            async move { f.current_or_pending().await.map(|s| s.id()) }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let (s2, _rx2) = session(2);
        factory.established(s2);
        assert_eq!(waiter.await.unwrap().unwrap(), 2);
    }

    #[test]
    fn test_backoff_grows_caps_and_resets() {
        let mut policy = ReconnectPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            2.0,
            0.0,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(2));
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(4));
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(8));
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(10));
        assert_eq!(policy.retries(), 4);

        policy.reset();
        assert_eq!(policy.retries(), 0);
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let mut policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        let delay = policy.next_delay(&mut rng).as_secs_f64();
        let base = std::f64::consts::E;
        assert!(delay >= base * (1.0 - 0.12) && delay <= base * (1.0 + 0.12));
    }

    #[tokio::test]
    async fn test_established_resets_backoff() {
        let factory = SessionFactory::new();
        {
            let mut backoff = factory.backoff.lock();
            let mut rng = StdRng::seed_from_u64(3);
            backoff.next_delay(&mut rng);
            backoff.next_delay(&mut rng);
            assert_eq!(backoff.retries(), 2);
        }
        let (s, _rx) = session(1);
        factory.established(s);
        assert_eq!(factory.backoff.lock().retries(), 0);
    }
}
