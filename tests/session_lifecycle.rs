//! Integration tests for a session's life: registration, liveness probing,
//! chat dispatch, and reconnect handoff through the factory.
//!
//! The IRC server is played by the test over an in-memory duplex stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use theresa::chat::{ChatRouter, CommandTable, DEFAULT_COMMAND_PREFIX};
use theresa::irc::{DisconnectReason, ProtocolSession, SessionConfig, SessionFactory};
use theresa::twitter::{LookupError, Status, StatusLookup, TimelineQuery, User};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct FakeLookup {
    fail: bool,
    timelines: Mutex<Vec<(String, TimelineQuery)>>,
}

fn status(user: &str, text: &str) -> Status {
    Status {
        id_str: None,
        text: text.to_string(),
        full_text: None,
        user: User {
            screen_name: user.to_string(),
        },
        retweeted_status: None,
    }
}

#[async_trait]
impl StatusLookup for FakeLookup {
    async fn show(&self, id: &str) -> Result<Status, LookupError> {
        if self.fail {
            return Err(LookupError::NotFound(format!("status {id}")));
        }
        Ok(status("hussie", &format!("status number {id}")))
    }

    async fn user_timeline(
        &self,
        screen_name: &str,
        query: TimelineQuery,
    ) -> Result<Vec<Status>, LookupError> {
        self.timelines.lock().push((screen_name.to_string(), query));
        if self.fail {
            return Err(LookupError::HttpStatus(503));
        }
        Ok(vec![status(screen_name, "latest thoughts")])
    }
}

struct FakeServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Consume registration and accept it.
    async fn welcome(&mut self, nick: &str) {
        assert_eq!(self.line().await, format!("NICK {nick}"));
        assert!(self.line().await.starts_with("USER "));
        self.send(&format!(":irc.example.org 001 {nick} :Welcome")).await;
        assert_eq!(self.line().await, "JOIN #mspa");
    }
}

struct Harness {
    factory: Arc<SessionFactory>,
    router: Arc<ChatRouter>,
    config: Arc<SessionConfig>,
}

impl Harness {
    fn new(lookup: Arc<FakeLookup>) -> Self {
        let lookup: Arc<dyn StatusLookup> = lookup;
        let router = ChatRouter::new(
            DEFAULT_COMMAND_PREFIX,
            CommandTable::standard(Arc::clone(&lookup)),
            lookup,
        );
        Self {
            factory: Arc::new(SessionFactory::new()),
            router: Arc::new(router),
            config: Arc::new(SessionConfig::new("theresa", "#mspa")),
        }
    }

    fn connect(&self) -> (FakeServer, JoinHandle<DisconnectReason>) {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (read, write) = tokio::io::split(server_io);
        let session = ProtocolSession::new(
            self.factory.next_session_id(),
            Arc::clone(&self.config),
            Arc::clone(&self.factory),
            Arc::clone(&self.router),
        );
        let task = tokio::spawn(session.run(client_io));
        (
            FakeServer {
                reader: BufReader::new(read),
                writer: write,
            },
            task,
        )
    }
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_six_unanswered_probes_disconnect() {
    let harness = Harness::new(Arc::default());
    let (mut server, task) = harness.connect();
    server.welcome("theresa").await;

    for _ in 0..6 {
        assert_eq!(server.line().await, "PING :theresa-liveness");
    }

    match task.await.unwrap() {
        DisconnectReason::LivenessExhausted { outstanding } => assert_eq!(outstanding, 6),
        other => panic!("expected liveness disconnect, got {other:?}"),
    }
    assert!(harness.factory.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pong_buys_another_probe() {
    let harness = Harness::new(Arc::default());
    let (mut server, task) = harness.connect();
    server.welcome("theresa").await;

    for _ in 0..5 {
        assert_eq!(server.line().await, "PING :theresa-liveness");
    }
    server.send(":irc.example.org PONG irc.example.org :theresa-liveness").await;

    // 5 - 1 + 2 = 6 outstanding after two more probes.
    assert_eq!(server.line().await, "PING :theresa-liveness");
    assert!(!task.is_finished());
    assert_eq!(server.line().await, "PING :theresa-liveness");

    assert!(matches!(
        task.await.unwrap(),
        DisconnectReason::LivenessExhausted { outstanding: 6 }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_before_welcome_is_dropped() {
    let harness = Harness::new(Arc::default());
    let (mut server, task) = harness.connect();
    assert_eq!(server.line().await, "NICK theresa");
    assert!(server.line().await.starts_with("USER "));

    // The server holds the connection open and never sends 001.
    for _ in 0..6 {
        assert_eq!(server.line().await, "PING :theresa-liveness");
    }

    let reason = tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("session should give up on a silent server")
        .unwrap();
    assert!(matches!(
        reason,
        DisconnectReason::LivenessExhausted { outstanding: 6 }
    ));
    assert!(harness.factory.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_welcome_still_registers() {
    let harness = Harness::new(Arc::default());
    let (mut server, task) = harness.connect();
    server.line().await;
    server.line().await;

    assert_eq!(server.line().await, "PING :theresa-liveness");
    server.send(":irc.example.org PONG irc.example.org :theresa-liveness").await;
    server.send(":irc.example.org 001 theresa :Welcome").await;

    assert_eq!(server.line().await, "JOIN #mspa");
    assert!(!task.is_finished());
    assert_eq!(harness.factory.current().unwrap().nickname(), "theresa");
}

// ============================================================================
// Chat dispatch
// ============================================================================

#[tokio::test]
async fn test_twat_posts_latest_status() {
    let lookup = Arc::new(FakeLookup::default());
    let harness = Harness::new(Arc::clone(&lookup));
    let (mut server, _task) = harness.connect();
    server.welcome("theresa").await;

    server.send(":bob!b@h PRIVMSG #mspa :,twat alice").await;

    assert_eq!(server.line().await, "PRIVMSG #mspa :<alice> latest thoughts");
    assert_eq!(
        *lookup.timelines.lock(),
        vec![(
            "alice".to_string(),
            TimelineQuery {
                count: 1,
                include_rts: true
            }
        )]
    );
}

#[tokio::test]
async fn test_failing_handler_reports_and_session_survives() {
    let lookup = Arc::new(FakeLookup {
        fail: true,
        ..FakeLookup::default()
    });
    let harness = Harness::new(lookup);
    let (mut server, task) = harness.connect();
    server.welcome("theresa").await;

    server.send(":bob!b@h PRIVMSG #mspa :,twat alice").await;
    assert_eq!(
        server.line().await,
        "PRIVMSG #mspa :error in twat: HTTP error: status 503"
    );

    server.send("PING :after").await;
    assert_eq!(server.line().await, "PONG :after");
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_status_link_expanded() {
    let harness = Harness::new(Arc::default());
    let (mut server, _task) = harness.connect();
    server.welcome("theresa").await;

    server
        .send(":bob!b@h PRIVMSG #mspa :look http://twitter.com/#!/hussie/status/1234 wow")
        .await;

    assert_eq!(
        server.line().await,
        "PRIVMSG #mspa :<hussie> status number 1234"
    );
}

#[tokio::test]
async fn test_private_messages_are_not_commands() {
    let lookup = Arc::new(FakeLookup::default());
    let harness = Harness::new(Arc::clone(&lookup));
    let (mut server, _task) = harness.connect();
    server.welcome("theresa").await;

    server.send(":bob!b@h PRIVMSG theresa :,twat alice").await;
    server.send("PING :sync").await;

    assert_eq!(server.line().await, "PONG :sync");
    assert!(lookup.timelines.lock().is_empty());
}

#[tokio::test]
async fn test_ctcp_ping_echoed_and_action_ignored() {
    let harness = Harness::new(Arc::default());
    let (mut server, _task) = harness.connect();
    server.welcome("theresa").await;

    server.send(":bob!b@h PRIVMSG #mspa :\x01ACTION waves\x01").await;
    server.send(":bob!b@h PRIVMSG theresa :\x01ping 12345\x01").await;

    assert_eq!(server.line().await, "NOTICE bob :\x01PING 12345\x01");
}

// ============================================================================
// Reconnect handoff
// ============================================================================

#[tokio::test]
async fn test_waiter_gets_next_session_after_reconnect() {
    let harness = Harness::new(Arc::default());

    let (mut first, first_task) = harness.connect();
    first.welcome("theresa").await;
    let first_id = harness.factory.current().unwrap().id();

    drop(first);
    assert!(matches!(
        first_task.await.unwrap(),
        DisconnectReason::ClosedByPeer
    ));
    assert!(harness.factory.current().is_none());

    let factory = Arc::clone(&harness.factory);
    let waiter = tokio::spawn(async move { factory.current_or_pending().await });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    let (mut second, _second_task) = harness.connect();
    second.welcome("theresa").await;

    let session = waiter.await.unwrap().unwrap();
    assert_ne!(session.id(), first_id);
    assert!(session.is_live());
    assert_eq!(harness.factory.current().unwrap().id(), session.id());
}

#[tokio::test]
async fn test_queued_line_survives_a_dropped_connection() {
    let harness = Harness::new(Arc::default());
    let (mut first, first_task) = harness.connect();
    first.welcome("theresa").await;
    let session = harness.factory.current().unwrap();

    // The connection dies while the announcement is still queued.
    drop(first);
    session.say("Page 2 (http://example.com/page/2)").unwrap();
    first_task.await.unwrap();
    assert!(!session.is_live());

    let (mut second, _second_task) = harness.connect();
    second.welcome("theresa").await;
    assert_eq!(
        second.line().await,
        "PRIVMSG #mspa :Page 2 (http://example.com/page/2)"
    );
}

#[tokio::test]
async fn test_drop_before_registration_keeps_waiters() {
    let harness = Harness::new(Arc::default());
    let factory = Arc::clone(&harness.factory);
    let waiter = tokio::spawn(async move { factory.current_or_pending().await });

    let (mut aborted, aborted_task) = harness.connect();
    aborted.line().await;
    drop(aborted);
    aborted_task.await.unwrap();
    assert!(!waiter.is_finished());

    let (mut server, _task) = harness.connect();
    server.welcome("theresa").await;

    let session = waiter.await.unwrap().unwrap();
    assert_eq!(session.nickname(), "theresa");
}
