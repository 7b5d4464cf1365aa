use std::sync::LazyLock;

use regex::Regex;

/// Matches status permalinks, old hashbang style included:
/// `twitter.com/#!/user/status/123`, `x.com/user/status/123`.
static STATUS_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:twitter|x)\.com/(?:#!/)?[^/\s]+/status(?:es)?/(\d+)")
        .unwrap_or_else(|e| unreachable!("static status link pattern: {e}"))
});

/// Status ids linked in `text`, in order of appearance.
pub fn status_ids(text: &str) -> Vec<String> {
    STATUS_LINK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .collect()
}
