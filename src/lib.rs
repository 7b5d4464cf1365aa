//! theresa: an IRC bot that announces new webcomic pages and expands status
//! links posted in its channel.
//!
//! The binary wires these pieces together; they are exposed as a library so
//! integration tests can drive them directly.

pub mod chat;
pub mod config;
pub mod feed;
pub mod irc;
pub mod twitter;
pub mod util;
