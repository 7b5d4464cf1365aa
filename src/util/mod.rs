//! Utility functions for common operations.
//!
//! - **Text processing**: control-character stripping, wire-safe line
//!   splitting and entity decoding for text that ends up in chat
//! - **HTTP**: size-capped body reads shared by every outbound request
//!
//! # Examples
//!
//! ```
//! use theresa::util::{split_for_wire, strip_control_chars};
//!
//! let clean = strip_control_chars("hello\x01world");
//! assert_eq!(clean, "helloworld");
//!
//! let chunks = split_for_wire("one\ntwo", 400);
//! assert_eq!(chunks, vec!["one", "two"]);
//! ```

mod http;
mod text;

pub use http::{read_limited_bytes, BodyError, REQUEST_TIMEOUT};
pub use text::{split_for_wire, strip_control_chars, unescape_basic_entities};
