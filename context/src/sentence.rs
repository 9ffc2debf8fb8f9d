//! Sentence-boundary-respecting trims.
//!
//! Budget trims never cut mid-sentence: text is split into contiguous
//! sentence spans and whole sentences are accumulated until the character
//! budget runs out. Splitting is aware of common abbreviations and of inline
//! markup, so a period inside `<a href="x.html">` or after "Dr" does not end
//! a sentence.

/// Which end of the text survives a trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// Accumulate sentences from the start forward.
    Head,
    /// Accumulate sentences from the end backward (keeps the tail).
    Tail,
}

const CHARS_PER_TOKEN: usize = 4;

/// Dotted abbreviations that do not terminate a sentence. Single-letter
/// initials ("J. Doe", "e.g.") are recognized separately.
const ABBREVIATIONS: &[&str] = &[
    "etc", "vs", "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "no", "fig", "approx",
];

/// Split `text` into contiguous sentence spans covering the whole input.
///
/// Each span includes its trailing whitespace, so concatenating the spans
/// reconstructs the input exactly.
#[must_use]
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut in_tag = false;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '.' | '!' | '?' if !in_tag => {
                // Consume a terminator run ("...", "?!").
                let mut j = i + 1;
                while j < chars.len() && matches!(chars[j].1, '.' | '!' | '?') {
                    j += 1;
                }
                let at_break = j >= chars.len() || chars[j].1.is_whitespace();
                let abbreviation = ch == '.' && j == i + 1 && is_abbreviation(text, pos);
                if at_break && !abbreviation {
                    // The span extends through the following whitespace run.
                    let mut k = j;
                    while k < chars.len() && chars[k].1.is_whitespace() {
                        k += 1;
                    }
                    let end = if k < chars.len() { chars[k].0 } else { text.len() };
                    spans.push((start, end));
                    start = end;
                    i = k;
                    continue;
                }
                i = j;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Trim `text` to at most `token_budget` tokens' worth of whole sentences.
///
/// Accumulates sentences while `accumulated_chars / 4 <= token_budget`,
/// forward for [`Keep::Head`], backward for [`Keep::Tail`]. The result is a
/// contiguous slice of the input; it may be empty when even the first
/// sentence exceeds the budget.
#[must_use]
pub fn trim_to_token_budget(text: &str, token_budget: u32, keep: Keep) -> &str {
    let spans = sentence_spans(text);
    let budget = token_budget as usize;
    let mut accumulated = 0usize;

    match keep {
        Keep::Head => {
            let mut cut = 0usize;
            for &(s, e) in &spans {
                let len = text[s..e].chars().count();
                if (accumulated + len) / CHARS_PER_TOKEN > budget {
                    break;
                }
                accumulated += len;
                cut = e;
            }
            &text[..cut]
        }
        Keep::Tail => {
            let mut cut = text.len();
            for &(s, e) in spans.iter().rev() {
                let len = text[s..e].chars().count();
                if (accumulated + len) / CHARS_PER_TOKEN > budget {
                    break;
                }
                accumulated += len;
                cut = s;
            }
            &text[cut..]
        }
    }
}

fn is_abbreviation(text: &str, dot_pos: usize) -> bool {
    let word: String = text[..dot_pos]
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if word.is_empty() {
        return false;
    }
    // Single letters are initials ("J. Doe") or pieces of "e.g." / "i.e.".
    if word.chars().count() == 1 {
        return true;
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}
