//! Chat command table and dispatch.
//!
//! Commands are looked up by lowercase name in a table built once at
//! startup. Handlers are async and run on their own task; whatever they
//! return or panic with is reported back to the channel and logged, never
//! propagated into the session.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;

use crate::irc::SessionHandle;
use crate::twitter::{StatusLookup, TimelineQuery};

/// What a handler gets to work with.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Channel the command was issued in; replies go here.
    pub channel: String,
    /// Tokens after the command name.
    pub args: Vec<String>,
    pub session: SessionHandle,
}

pub type CommandHandler =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The command word as typed, for error messages.
    pub raw_name: String,
    /// Lowercased command word, used for lookup.
    pub name: String,
    pub args: Vec<String>,
}

/// Tokenize a command line (prefix already removed) with shell quoting rules.
///
/// Returns `Ok(None)` for a line with no tokens.
pub fn parse_invocation(line: &str) -> Result<Option<Invocation>, shell_words::ParseError> {
    let mut tokens = shell_words::split(line)?.into_iter();
    let Some(raw_name) = tokens.next() else {
        return Ok(None);
    };
    Ok(Some(Invocation {
        name: raw_name.to_lowercase(),
        raw_name,
        args: tokens.collect(),
    }))
}

#[derive(Default, Clone)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bot's built-in commands, wired to their collaborators.
    pub fn standard(lookup: Arc<dyn StatusLookup>) -> Self {
        let mut table = Self::new();
        table.register("twat", move |ctx| twat(Arc::clone(&lookup), ctx));
        table
    }

    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.handlers.insert(name.to_lowercase(), handler);
    }

    pub fn get(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.names())
            .finish()
    }
}

/// Run `handler` on its own task, reporting failure to the channel.
pub fn spawn_handler(
    command: String,
    handler: CommandHandler,
    ctx: CommandContext,
) -> JoinHandle<()> {
    let session = ctx.session.clone();
    let channel = ctx.channel.clone();

    tokio::spawn(async move {
        // Build the future inside the guarded block so a panic while
        // constructing it is caught too.
        let outcome = AssertUnwindSafe(async move { handler(ctx).await })
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        tracing::warn!(command = %command, channel = %channel, error = %error, "Command failed");
        report_error(&session, &channel, &command, &error);
    })
}

/// Post the inline error line for a failed command.
pub fn report_error(session: &SessionHandle, channel: &str, command: &str, error: &str) {
    if let Err(e) = session.msg(channel, &format!("error in {command}: {error}")) {
        tracing::debug!(command = %command, error = %e, "Could not report command error");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// `twat <username>`: post the user's most recent status.
async fn twat(lookup: Arc<dyn StatusLookup>, ctx: CommandContext) -> anyhow::Result<()> {
    let user = ctx.args.first().context("usage: twat <username>")?;
    let statuses = lookup.user_timeline(user, TimelineQuery::latest()).await?;
    if statuses.is_empty() {
        anyhow::bail!("no statuses from {user}");
    }
    for status in statuses {
        ctx.session.msg(&ctx.channel, &status.render())?;
    }
    Ok(())
}
