//! IRC client plumbing.
//!
//! - [`codec`] - CRLF line framing with the protocol's length limits
//! - [`message`] - inbound message parsing and outbound commands
//! - [`ctcp`] - CTCP query extraction and standard replies
//! - [`session`] - the per-connection state machine
//! - [`handle`] - cloneable sending side of a registered session
//! - [`factory`] - owner of the live session and the reconnect loop

pub mod codec;
pub mod ctcp;
pub mod factory;
pub mod handle;
pub mod message;
pub mod session;

use std::time::Duration;

use thiserror::Error;

pub use codec::LineCodec;
pub use ctcp::CtcpInfo;
pub use factory::{Endpoint, FactoryClosed, PendingSession, ReconnectPolicy, SessionFactory};
pub use handle::{SessionClosed, SessionHandle};
pub use message::{Command, Message};
pub use session::{DisconnectReason, ProtocolSession, SessionConfig, SessionState};

/// Wire-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line too long: {actual} bytes (limit {limit})")]
    LineTooLong { actual: usize, limit: usize },
    #[error("Outbound line contains CR or LF")]
    EmbeddedNewline,
    #[error("Empty message")]
    EmptyMessage,
    #[error("No command in line: {0:?}")]
    MissingCommand(String),
}

/// Errors that end a connection attempt or a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Connection failed: {0}")]
    Connect(std::io::Error),
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),
}
