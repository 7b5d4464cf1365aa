//! Channel chat handling: status links, commands and banter.
//!
//! The [`ChatRouter`] is built once at startup and shared by every session.
//! It decides what a channel line is and kicks off the matching work on
//! spawned tasks, so a slow lookup or a broken handler never stalls the
//! connection that delivered the line.

pub mod banter;
pub mod commands;
pub mod links;

use std::sync::Arc;

pub use banter::{Banter, ButtifyCooldown};
pub use commands::{CommandContext, CommandHandler, CommandTable, Invocation};

use crate::irc::SessionHandle;
use crate::twitter::StatusLookup;

pub const DEFAULT_COMMAND_PREFIX: char = ',';

/// How a channel line was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Started with the command prefix.
    Command,
    /// Ordinary chatter, eligible for banter.
    Chatter,
}

pub struct ChatRouter {
    prefix: char,
    commands: CommandTable,
    lookup: Arc<dyn StatusLookup>,
    banter: Option<Banter>,
}

impl ChatRouter {
    pub fn new(prefix: char, commands: CommandTable, lookup: Arc<dyn StatusLookup>) -> Self {
        Self {
            prefix,
            commands,
            lookup,
            banter: None,
        }
    }

    pub fn with_banter(mut self, banter: Option<Banter>) -> Self {
        self.banter = banter;
        self
    }

    pub fn banter(&self) -> Option<&Banter> {
        self.banter.as_ref()
    }

    /// Handle one line of channel text (CTCP already removed).
    pub fn route(&self, session: &SessionHandle, channel: &str, text: &str) -> Routed {
        for id in links::status_ids(text) {
            self.spawn_status(session, channel, id);
        }

        let Some(line) = text.strip_prefix(self.prefix) else {
            return Routed::Chatter;
        };

        match commands::parse_invocation(line) {
            Ok(Some(invocation)) => match self.commands.get(&invocation.name) {
                Some(handler) => {
                    tracing::debug!(command = %invocation.name, channel = %channel, "Dispatching command");
                    let ctx = CommandContext {
                        channel: channel.to_string(),
                        args: invocation.args,
                        session: session.clone(),
                    };
                    commands::spawn_handler(invocation.raw_name, handler, ctx);
                }
                None => {
                    tracing::debug!(command = %invocation.name, "Ignoring unknown command");
                }
            },
            Ok(None) => {}
            Err(e) => {
                let name = line.split_whitespace().next().unwrap_or_default();
                tracing::warn!(command = %name, error = %e, "Could not tokenize command");
                commands::report_error(session, channel, name, &e.to_string());
            }
        }
        Routed::Command
    }

    fn spawn_status(&self, session: &SessionHandle, channel: &str, id: String) {
        let lookup = Arc::clone(&self.lookup);
        let session = session.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            match lookup.show(&id).await {
                Ok(status) => {
                    if let Err(e) = session.msg(&channel, &status.render()) {
                        tracing::debug!(status = %id, error = %e, "Session gone before status posted");
                    }
                }
                Err(e) => tracing::warn!(status = %id, error = %e, "Status lookup failed"),
            }
        });
    }
}

impl std::fmt::Debug for ChatRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRouter")
            .field("prefix", &self.prefix)
            .field("commands", &self.commands)
            .field("banter", &self.banter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::Command;
    use crate::twitter::{LookupError, Status, TimelineQuery, User};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorded {
        shown: Mutex<Vec<String>>,
        timelines: Mutex<Vec<(String, TimelineQuery)>>,
    }

    #[async_trait]
    impl StatusLookup for Recorded {
        async fn show(&self, id: &str) -> Result<Status, LookupError> {
            self.shown.lock().push(id.to_string());
            Ok(Status {
                id_str: Some(id.to_string()),
                text: "shown".into(),
                full_text: None,
                user: User {
                    screen_name: "hussie".into(),
                },
                retweeted_status: None,
            })
        }

        async fn user_timeline(
            &self,
            screen_name: &str,
            query: TimelineQuery,
        ) -> Result<Vec<Status>, LookupError> {
            self.timelines.lock().push((screen_name.to_string(), query));
            Ok(Vec::new())
        }
    }

    fn setup() -> (
        ChatRouter,
        Arc<Recorded>,
        SessionHandle,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let lookup = Arc::new(Recorded::default());
        let router = ChatRouter::new(
            DEFAULT_COMMAND_PREFIX,
            CommandTable::standard(lookup.clone()),
            lookup.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        (router, lookup, SessionHandle::new(1, "theresa", "#mspa", tx), rx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_chatter_is_classified() {
        let (router, lookup, session, mut rx) = setup();
        assert_eq!(router.route(&session, "#mspa", "just talking"), Routed::Chatter);
        settle().await;
        assert!(rx.try_recv().is_err());
        assert!(lookup.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_link_posts_rendered_status() {
        let (router, lookup, session, mut rx) = setup();
        let routed = router.route(&session, "#mspa", "see twitter.com/#!/hussie/status/42");
        assert_eq!(routed, Routed::Chatter);
        settle().await;
        assert_eq!(*lookup.shown.lock(), vec!["42".to_string()]);
        assert_eq!(rx.try_recv().unwrap(), Command::privmsg("#mspa", "<hussie> shown"));
    }

    #[tokio::test]
    async fn test_twat_command_queries_latest_with_retweets() {
        let (router, lookup, session, _rx) = setup();
        assert_eq!(router.route(&session, "#mspa", ",TWAT alice"), Routed::Command);
        settle().await;
        assert_eq!(
            *lookup.timelines.lock(),
            vec![("alice".to_string(), TimelineQuery::latest())]
        );
    }

    #[tokio::test]
    async fn test_twat_without_user_reports_usage() {
        let (router, _lookup, session, mut rx) = setup();
        router.route(&session, "#mspa", ",twat");
        settle().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Command::privmsg("#mspa", "error in twat: usage: twat <username>")
        );
    }

    #[tokio::test]
    async fn test_unbalanced_quotes_reported_as_error() {
        let (router, _lookup, session, mut rx) = setup();
        router.route(&session, "#mspa", ",twat \"alice");
        match rx.try_recv().unwrap() {
            Command::Privmsg { target, text } => {
                assert_eq!(target, "#mspa");
                assert!(text.starts_with("error in twat: "), "{text}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_ignored() {
        let (router, _lookup, session, mut rx) = setup();
        assert_eq!(router.route(&session, "#mspa", ",frobnicate"), Routed::Command);
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
