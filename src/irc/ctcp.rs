//! CTCP (Client-to-Client Protocol) extraction and standard replies.
//!
//! CTCP queries ride inside PRIVMSG bodies between `\x01` delimiters. A body
//! may interleave plain text and several queries; [`extract`] separates the
//! two. Query tags are uppercased on extraction so lookup is
//! case-insensitive, while payloads are passed through untouched.

/// The CTCP delimiter character (`\x01`).
pub const CTCP_DELIM: char = '\x01';

/// Queries this bot answers, as advertised by CLIENTINFO.
const SUPPORTED: &str = "ACTION CLIENTINFO PING SOURCE TIME VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtcpQuery {
    /// Uppercased query tag, e.g. `VERSION`.
    pub tag: String,
    pub payload: Option<String>,
}

/// A PRIVMSG body split into CTCP queries and remaining plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub queries: Vec<CtcpQuery>,
    /// Plain text segments joined back together; empty if the body was pure CTCP.
    pub text: String,
}

/// Identity strings used in VERSION and SOURCE replies.
#[derive(Debug, Clone)]
pub struct CtcpInfo {
    pub version: String,
    pub source: String,
}

impl Default for CtcpInfo {
    fn default() -> Self {
        Self {
            version: format!("theresa {}", env!("CARGO_PKG_VERSION")),
            source: env!("CARGO_PKG_REPOSITORY").to_string(),
        }
    }
}

/// Split a message body into CTCP queries and plain text.
///
/// Segments at odd positions between delimiters are queries; an unterminated
/// trailing query is still accepted, as most clients do.
pub fn extract(body: &str) -> Extracted {
    if !body.contains(CTCP_DELIM) {
        return Extracted {
            queries: Vec::new(),
            text: body.to_string(),
        };
    }

    let mut extracted = Extracted::default();
    for (index, segment) in body.split(CTCP_DELIM).enumerate() {
        if index % 2 == 0 {
            extracted.text.push_str(segment);
            continue;
        }
        if segment.is_empty() {
            continue;
        }
        let (tag, payload) = match segment.split_once(' ') {
            Some((tag, payload)) => (tag, Some(payload.to_string())),
            None => (segment, None),
        };
        extracted.queries.push(CtcpQuery {
            tag: tag.to_ascii_uppercase(),
            payload,
        });
    }
    extracted
}

/// Wrap a CTCP reply body in delimiters, ready to send as a NOTICE.
pub fn wrap(tag: &str, payload: Option<&str>) -> String {
    match payload {
        Some(payload) if !payload.is_empty() => format!("{CTCP_DELIM}{tag} {payload}{CTCP_DELIM}"),
        _ => format!("{CTCP_DELIM}{tag}{CTCP_DELIM}"),
    }
}

/// Standard reply to a query, or `None` for queries that take no answer.
pub fn reply(query: &CtcpQuery, info: &CtcpInfo) -> Option<String> {
    match query.tag.as_str() {
        "ACTION" => None,
        "VERSION" => Some(wrap("VERSION", Some(&info.version))),
        "SOURCE" => Some(wrap("SOURCE", Some(&info.source))),
        "PING" => Some(wrap("PING", query.payload.as_deref())),
        "TIME" => {
            let now = chrono::Local::now().format("%a %b %d %H:%M:%S %Y").to_string();
            Some(wrap("TIME", Some(&format!(":{now}"))))
        }
        "CLIENTINFO" => Some(wrap(
            "CLIENTINFO",
            Some(&format!(":{SUPPORTED}")),
        )),
        other => Some(wrap(
            "ERRMSG",
            Some(&format!("{other} :Unknown query '{other}'")),
        )),
    }
}
