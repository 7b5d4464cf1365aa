use std::borrow::Cow;

/// IRC formatting codes that clients render: bold, color, reset, reverse,
/// italic, underline. These survive sanitizing.
const IRC_FORMATTING: [u8; 6] = [0x02, 0x03, 0x0f, 0x16, 0x1d, 0x1f];

fn is_stripped(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r' && !IRC_FORMATTING.contains(&b))
}

/// Strip control characters that must never reach the wire from text
/// coming out of feeds and status lookups.
///
/// Removes NUL, the CTCP delimiter (0x01), ESC and the other C0 controls
/// plus DEL. Keeps tab, line breaks (callers split on those) and IRC
/// formatting codes.
///
/// Returns `Cow::Borrowed` when the input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    // Control bytes are ASCII and can never appear mid-codepoint, so a
    // char-level filter is equivalent to a byte-level one here.
    Cow::Owned(
        s.chars()
            .filter(|&c| !(c.is_ascii() && is_stripped(c as u8)))
            .collect(),
    )
}

/// Split outbound text into wire-safe chunks.
///
/// Each line of `text` (on `\n`, with any `\r` dropped) becomes one or more
/// chunks of at most `max_bytes` bytes, cut on char boundaries. Blank lines
/// are skipped.
pub fn split_for_wire(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(4);
    let mut chunks = Vec::new();

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let mut rest = line;
        while rest.len() > max_bytes {
            let mut cut = max_bytes;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            chunks.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        if !rest.is_empty() {
            chunks.push(rest.to_string());
        }
    }

    chunks
}

/// Decode the three HTML entities status services escape in plain text.
pub fn unescape_basic_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    // `&amp;` last so "&amp;lt;" stays a literal "&lt;".
    Cow::Owned(
        s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}
