//! Fragment reassembly over the token-delta stream.
//!
//! Model output arrives as arbitrary text slices that split tags and
//! elements anywhere. The assembler buffers deltas and releases a fragment
//! only once it is structurally safe to insert: every opened tag is closed,
//! the buffer is bracket-bounded, and no tag is split across the tail.

/// Tags that never take a closing counterpart.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Reassembles structurally complete markup fragments from a delta stream.
///
/// State per generation attempt; retries start from a fresh assembler so no
/// partial-fragment state leaks across requests.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    pending: String,
    open_tags: Vec<String>,
    /// Byte offset into `pending` already scanned for tags.
    scan_pos: usize,
    /// A `<` was seen whose `>` has not arrived yet.
    dangling_tag: bool,
}

impl FragmentAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta. Returns a completed fragment when the buffer became
    /// structurally complete with this delta.
    pub fn push_delta(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        self.pending.push_str(delta);
        self.scan();

        if self.is_complete() {
            let fragment = std::mem::take(&mut self.pending);
            self.scan_pos = 0;
            self.dangling_tag = false;
            Some(fragment)
        } else {
            None
        }
    }

    /// End-of-stream flush: hand out whatever is buffered, complete or not.
    /// Partial trailing content is preferable to dropping it.
    pub fn finish(&mut self) -> Option<String> {
        let leftover = std::mem::take(&mut self.pending);
        self.open_tags.clear();
        self.scan_pos = 0;
        self.dangling_tag = false;
        if leftover.trim().is_empty() {
            None
        } else {
            Some(leftover)
        }
    }

    /// Whether anything is buffered, complete or not.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.trim().is_empty()
    }

    fn is_complete(&self) -> bool {
        let trimmed = self.pending.trim();
        !trimmed.is_empty()
            && !self.dangling_tag
            && self.open_tags.is_empty()
            && trimmed.starts_with('<')
            && trimmed.ends_with('>')
    }

    fn scan(&mut self) {
        let bytes = self.pending.as_bytes();
        let mut i = self.scan_pos;
        while i < bytes.len() {
            if bytes[i] == b'<' {
                match find_tag_end(&self.pending[i..]) {
                    Some(rel_end) => {
                        let tag = &self.pending[i + 1..i + rel_end];
                        apply_tag(&mut self.open_tags, tag);
                        i += rel_end + 1;
                    }
                    None => {
                        // Tag split across deltas; rescan from here next time.
                        self.scan_pos = i;
                        self.dangling_tag = true;
                        return;
                    }
                }
            } else {
                i += 1;
            }
        }
        self.scan_pos = bytes.len();
        self.dangling_tag = false;
    }
}

/// Byte offset of the `>` closing a tag that starts at `text[0] == '<'`,
/// skipping `>` inside quoted attribute values. `None` when unterminated.
fn find_tag_end(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, ch) in text.char_indices().skip(1) {
        match (quote, ch) {
            (None, '"' | '\'') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn apply_tag(open_tags: &mut Vec<String>, tag: &str) {
    let tag = tag.trim();
    if tag.is_empty() || tag.starts_with('!') || tag.starts_with('?') {
        return;
    }

    if let Some(name) = tag.strip_prefix('/') {
        let name = name.trim().to_ascii_lowercase();
        if let Some(pos) = open_tags.iter().rposition(|t| *t == name) {
            // Unwind past any unclosed children the model forgot about.
            open_tags.truncate(pos);
        }
        return;
    }

    let name: String = tag
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if name.is_empty() {
        return;
    }

    let self_closing = tag.ends_with('/');
    if self_closing || VOID_TAGS.contains(&name.as_str()) {
        return;
    }
    open_tags.push(name);
}
