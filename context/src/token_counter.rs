//! Approximate token counting.
//!
//! The counter estimates how many model tokens a text span costs without
//! pulling in an encoder vocabulary: whitespace is normalized, the text is
//! split into word-like tokens and standalone punctuation, and long words are
//! charged extra to approximate sub-word splitting. The estimate only has to
//! be deterministic and roughly proportional -- budgeting divides it out
//! again.

use regex::Regex;
use std::sync::OnceLock;

/// Words longer than this are charged as multiple sub-word tokens.
const LONG_WORD_CHARS: usize = 10;
const CHARS_PER_SUBWORD: usize = 4;

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn token_pattern() -> &'static Regex {
    TOKEN_PATTERN.get_or_init(|| {
        Regex::new(r"\w+(?:['\-]\w+)*|[^\w\s]").expect("token pattern must compile")
    })
}

/// Deterministic approximate token counter.
///
/// Cheap to construct: the underlying pattern is compiled once and shared
/// across all instances.
#[derive(Clone, Copy)]
pub struct TokenCounter {
    pattern: &'static Regex,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pattern: token_pattern(),
        }
    }

    /// Count the approximate token cost of `text`.
    ///
    /// Whitespace runs collapse to a single space and the input is trimmed
    /// before splitting. Every word or standalone punctuation mark costs one
    /// token, except words longer than 10 characters which cost
    /// `ceil(len / 4)`. Empty input costs zero.
    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return 0;
        }

        self.pattern
            .find_iter(&normalized)
            .map(|m| {
                let len = m.as_str().chars().count();
                if len > LONG_WORD_CHARS {
                    len.div_ceil(CHARS_PER_SUBWORD) as u32
                } else {
                    1
                }
            })
            .sum()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}
