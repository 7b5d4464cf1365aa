//! The "buttify" joke: every so often, a long line of channel chatter is
//! echoed back with a few short words replaced by `butt`.

use std::ops::Range;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tokio::time::Instant;

static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+|-").unwrap_or_else(|e| unreachable!("static separator pattern: {e}"))
});

#[derive(Debug, Clone)]
pub struct Banter {
    /// Lines must be longer than this many characters.
    min_chars: usize,
    /// Chance of trying at all is `1 / line_odds`.
    line_odds: u32,
    /// Chance of each eligible word being replaced is `1 / word_odds`.
    word_odds: u32,
    max_word_chars: usize,
    cooldown: Range<u64>,
}

impl Default for Banter {
    fn default() -> Self {
        Self {
            min_chars: 30,
            line_odds: 6,
            word_odds: 7,
            max_word_chars: 8,
            cooldown: 60..300,
        }
    }
}

/// Gate that keeps the joke from firing twice in quick succession.
#[derive(Debug, Clone, Default)]
pub struct ButtifyCooldown {
    ready_at: Option<Instant>,
}

impl ButtifyCooldown {
    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |at| now >= at)
    }

    fn trip(&mut self, now: Instant, delay: Duration) {
        self.ready_at = Some(now + delay);
    }
}

impl Banter {
    /// Maybe produce a reply to `text`, tripping the cooldown if one is made.
    pub fn respond<R: Rng + ?Sized>(
        &self,
        cooldown: &mut ButtifyCooldown,
        text: &str,
        now: Instant,
        rng: &mut R,
    ) -> Option<String> {
        if text.chars().count() <= self.min_chars
            || rng.gen_range(0..self.line_odds) != 0
            || !cooldown.is_ready(now)
        {
            return None;
        }

        let reply = self.buttify(text, rng)?;
        let delay = Duration::from_secs(rng.gen_range(self.cooldown.clone()));
        cooldown.trip(now, delay);
        tracing::debug!(delay_secs = delay.as_secs(), "Banter cooldown started");
        Some(reply)
    }

    /// Replace some short alphanumeric words with `butt`, keeping separators.
    /// `None` if no word was picked.
    pub fn buttify<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut replaced = false;
        let mut last = 0;

        let mut word = |word: &str, out: &mut String| {
            let eligible = !word.is_empty()
                && word.chars().all(char::is_alphanumeric)
                && word.chars().count() <= self.max_word_chars;
            if eligible && rng.gen_range(0..self.word_odds) == 0 {
                out.push_str("butt");
                replaced = true;
            } else {
                out.push_str(word);
            }
        };

        for sep in SEPARATOR.find_iter(text) {
            word(&text[last..sep.start()], &mut out);
            out.push_str(sep.as_str());
            last = sep.end();
        }
        word(&text[last..], &mut out);

        replaced.then_some(out)
    }
}
