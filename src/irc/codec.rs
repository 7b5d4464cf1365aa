//! Line-based codec for the IRC transport.
//!
//! Reads CRLF (or bare LF) terminated lines and writes lines with CRLF
//! appended. Inbound bytes that are not valid UTF-8 are decoded lossily;
//! plenty of networks still relay Latin-1 from old clients.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::ProtocolError;

/// Default inbound limit: 512 bytes of message plus the IRCv3 tag budget.
pub const MAX_INBOUND_LINE: usize = 512 + 8191;

/// Outbound limit from RFC 1459, CRLF included.
pub const MAX_OUTBOUND_LINE: usize = 512;

pub struct LineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    max_len: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_len(MAX_INBOUND_LINE)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                if src.len() > self.max_len {
                    return Err(ProtocolError::LineTooLong {
                        actual: src.len(),
                        limit: self.max_len,
                    });
                }
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(ProtocolError::LineTooLong {
                    actual: line.len(),
                    limit: self.max_len,
                });
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            // Servers occasionally emit keepalive blank lines; skip them.
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text.to_string()));
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if line.contains(['\r', '\n']) {
            return Err(ProtocolError::EmbeddedNewline);
        }
        if line.len() + 2 > MAX_OUTBOUND_LINE {
            return Err(ProtocolError::LineTooLong {
                actual: line.len() + 2,
                limit: MAX_OUTBOUND_LINE,
            });
        }
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
