//! Incremental document insertion.
//!
//! Each completed fragment is parsed into a small node tree, compiled into a
//! flat list of insertion steps, and executed by a driver loop that awaits
//! the typing delay between characters. Compiling first keeps the timing a
//! pure, substitutable policy and keeps strategy selection testable without
//! running the clock.
//!
//! # Strategies
//!
//! - **Opaque** (`table`, `blockquote`, `pre`, `img`, `form`, `figure`):
//!   inserted as one atomic subtree; partial structural state for these kinds
//!   would be invalid mid-stream.
//! - **Streamed** (lists and generic block/inline elements): container first,
//!   then text runs one character at a time.
//! - **Plain text**: top-level text nodes inserted directly.

use std::collections::BTreeSet;
use std::time::Duration;

use scraper::{ElementRef, Html, Node};
use tokio_util::sync::CancellationToken;

use scribe_document::{DocumentEditor, DocumentError, NodeRef, Position};

/// Element kinds inserted atomically, never streamed.
const OPAQUE_KINDS: &[&str] = &["table", "blockquote", "pre", "img", "form", "figure"];

/// Kinds that need a structural break after them so the cursor can leave the
/// container (e.g. exit a list context).
const BREAK_AFTER_KINDS: &[&str] = &["ul", "ol", "table"];

/// The generation session was cancelled mid-insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCancelled;

/// Per-character timing for the streamed insertion strategy.
#[derive(Debug, Clone, Copy)]
pub struct TypingPolicy {
    delay: Duration,
}

impl TypingPolicy {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Zero-delay policy for tests and non-interactive hosts.
    #[must_use]
    pub const fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl Default for TypingPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

#[derive(Debug, Clone)]
enum ParsedNode {
    Element {
        kind: String,
        attrs: Vec<(String, String)>,
        children: Vec<ParsedNode>,
    },
    Text(String),
}

/// One step of the insertion script.
#[derive(Debug, Clone)]
enum Op {
    /// Insert an element at the cursor and move the cursor inside it.
    Enter {
        kind: String,
        attrs: Vec<(String, String)>,
    },
    /// Move the cursor to just after the innermost open element.
    Exit,
    /// Insert text one character at a time, pausing between characters.
    Type(String),
    /// Insert text directly, without the typing effect.
    Raw(String),
    /// Insert a whole subtree atomically at the cursor.
    Atomic(ParsedNode),
    /// Insert an empty paragraph at the cursor and move inside it.
    Break,
}

/// Merges fragments into the live document across one generation session.
///
/// The insertion cursor is resolved from the live selection on the first
/// fragment only; later fragments continue from where the previous one left
/// off, never from the possibly stale external selection.
#[derive(Debug)]
pub struct DocumentInserter {
    typing: TypingPolicy,
    cursor: Option<Position>,
}

impl DocumentInserter {
    #[must_use]
    pub fn new(typing: TypingPolicy) -> Self {
        Self {
            typing,
            cursor: None,
        }
    }

    /// Whether any fragment has been merged in this session.
    #[must_use]
    pub const fn has_inserted(&self) -> bool {
        self.cursor.is_some()
    }

    /// Merge one fragment at the session cursor.
    ///
    /// Insertion errors are logged and abort only the remainder of this
    /// fragment; the session goes on with the next one. Cancellation is
    /// observed at every typing pause and propagates immediately.
    pub async fn apply_fragment<E: DocumentEditor>(
        &mut self,
        editor: &mut E,
        html: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SessionCancelled> {
        let nodes = parse_fragment(html);
        if nodes.is_empty() {
            return Ok(());
        }

        let allowed = editor.allowed_markup_vocabulary();
        let mut ops = Vec::new();
        compile(&nodes, &allowed, &mut ops, true);

        let mut cursor = self
            .cursor
            .unwrap_or_else(|| editor.selection_position());
        let mut stack: Vec<NodeRef> = Vec::new();

        for op in ops {
            match self.drive(editor, op, cursor, &mut stack, cancel).await {
                Ok(next) => {
                    cursor = next;
                    self.cursor = Some(cursor);
                }
                Err(StepError::Cancelled) => {
                    self.cursor = Some(cursor);
                    return Err(SessionCancelled);
                }
                Err(StepError::Document(e)) => {
                    tracing::warn!(error = %e, "dropping remainder of fragment after insertion error");
                    break;
                }
            }
        }

        self.cursor = Some(cursor);
        editor.set_selection(cursor);
        Ok(())
    }

    async fn drive<E: DocumentEditor>(
        &self,
        editor: &mut E,
        op: Op,
        cursor: Position,
        stack: &mut Vec<NodeRef>,
        cancel: &CancellationToken,
    ) -> Result<Position, StepError> {
        match op {
            Op::Enter { kind, attrs } => {
                let node = editor.insert_element(&kind, &attrs, cursor)?;
                stack.push(node);
                Ok(editor.position_inside_end(node)?)
            }
            Op::Exit => {
                let node = stack.pop().ok_or_else(|| {
                    StepError::Document(DocumentError::UnknownNode(NodeRef::new(u64::MAX)))
                })?;
                Ok(editor.position_after(node)?)
            }
            Op::Type(text) => {
                let mut cursor = cursor;
                let mut buf = [0u8; 4];
                for ch in text.chars() {
                    cursor = editor.insert_text(ch.encode_utf8(&mut buf), cursor)?;
                    editor.set_selection(cursor);
                    self.pause(cancel).await?;
                }
                Ok(cursor)
            }
            Op::Raw(text) => Ok(editor.insert_text(&text, cursor)?),
            Op::Atomic(node) => Ok(insert_subtree(editor, &node, cursor)?),
            Op::Break => {
                let paragraph = editor.insert_element("p", &[], cursor)?;
                Ok(editor.position_inside_end(paragraph)?)
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), SessionCancelled> {
        if self.typing.delay.is_zero() {
            if cancel.is_cancelled() {
                return Err(SessionCancelled);
            }
            return Ok(());
        }
        tokio::select! {
            () = cancel.cancelled() => Err(SessionCancelled),
            () = tokio::time::sleep(self.typing.delay) => Ok(()),
        }
    }
}

enum StepError {
    Cancelled,
    Document(DocumentError),
}

impl From<DocumentError> for StepError {
    fn from(e: DocumentError) -> Self {
        Self::Document(e)
    }
}

impl From<SessionCancelled> for StepError {
    fn from(_: SessionCancelled) -> Self {
        Self::Cancelled
    }
}

/// Compile parsed nodes into a flat insertion script.
fn compile(nodes: &[ParsedNode], allowed: &BTreeSet<String>, ops: &mut Vec<Op>, top_level: bool) {
    for node in nodes {
        match node {
            ParsedNode::Text(text) => {
                if top_level {
                    // Inter-block whitespace from the markup is not content.
                    if !text.trim().is_empty() {
                        ops.push(Op::Raw(text.clone()));
                    }
                } else {
                    ops.push(Op::Type(text.clone()));
                }
            }
            ParsedNode::Element { kind, .. } if OPAQUE_KINDS.contains(&kind.as_str()) => {
                ops.push(Op::Atomic(node.clone()));
                if BREAK_AFTER_KINDS.contains(&kind.as_str()) && allowed.contains("p") {
                    ops.push(Op::Break);
                }
            }
            ParsedNode::Element {
                kind,
                attrs,
                children,
            } => {
                ops.push(Op::Enter {
                    kind: kind.clone(),
                    attrs: attrs.clone(),
                });
                compile(children, allowed, ops, false);
                ops.push(Op::Exit);
                if BREAK_AFTER_KINDS.contains(&kind.as_str()) && allowed.contains("p") {
                    ops.push(Op::Break);
                }
            }
        }
    }
}

/// Insert a whole subtree without pauses. Returns the position after it.
fn insert_subtree<E: DocumentEditor>(
    editor: &mut E,
    node: &ParsedNode,
    cursor: Position,
) -> Result<Position, DocumentError> {
    match node {
        ParsedNode::Text(text) => editor.insert_text(text, cursor),
        ParsedNode::Element {
            kind,
            attrs,
            children,
        } => {
            let element = editor.insert_element(kind, attrs, cursor)?;
            let mut inner = editor.position_inside_end(element)?;
            for child in children {
                inner = insert_subtree(editor, child, inner)?;
            }
            editor.position_after(element)
        }
    }
}

fn parse_fragment(html: &str) -> Vec<ParsedNode> {
    let document = Html::parse_fragment(html);
    convert_children(document.root_element())
}

fn convert_children(element: ElementRef<'_>) -> Vec<ParsedNode> {
    let mut out = Vec::new();
    for child in element.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    out.push(ParsedNode::Element {
                        kind: el.value().name().to_ascii_lowercase(),
                        attrs: el
                            .value()
                            .attrs()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                        children: convert_children(el),
                    });
                }
            }
            Node::Text(text) => {
                let text: &str = text;
                if !text.is_empty() {
                    out.push(ParsedNode::Text(text.to_string()));
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{DocumentInserter, SessionCancelled, TypingPolicy};
    use scribe_document::DocumentEditor;
    use scribe_document::memory::MemoryEditor;
    use tokio_util::sync::CancellationToken;

    fn inserter() -> DocumentInserter {
        DocumentInserter::new(TypingPolicy::instant())
    }

    async fn apply(editor: &mut MemoryEditor, html: &str) {
        let cancel = CancellationToken::new();
        inserter()
            .apply_fragment(editor, html, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn paragraph_is_streamed_into_place() {
        let mut editor = MemoryEditor::new();
        apply(&mut editor, "<p>hello</p>").await;
        assert_eq!(editor.to_html(), "<p>hello</p>");
    }

    #[tokio::test]
    async fn nested_inline_elements_stream() {
        let mut editor = MemoryEditor::new();
        apply(&mut editor, "<p>a <strong>bold</strong> word</p>").await;
        assert_eq!(editor.to_html(), "<p>a <strong>bold</strong> word</p>");
    }

    #[tokio::test]
    async fn table_inserts_atomically_with_break_after() {
        let mut editor = MemoryEditor::new();
        apply(
            &mut editor,
            "<table><tbody><tr><td>a</td><td>b</td></tr></tbody></table>",
        )
        .await;
        assert_eq!(
            editor.to_html(),
            "<table><tbody><tr><td>a</td><td>b</td></tr></tbody></table><p></p>"
        );
    }

    #[tokio::test]
    async fn list_gets_structural_break_and_cursor_moves_inside() {
        let mut editor = MemoryEditor::new();
        let cancel = CancellationToken::new();
        let mut inserter = inserter();
        inserter
            .apply_fragment(&mut editor, "<ul><li>one</li><li>two</li></ul>", &cancel)
            .await
            .unwrap();
        assert_eq!(editor.to_html(), "<ul><li>one</li><li>two</li></ul><p></p>");

        // The next fragment continues inside the break paragraph.
        inserter
            .apply_fragment(&mut editor, "after", &cancel)
            .await
            .unwrap();
        assert_eq!(
            editor.to_html(),
            "<ul><li>one</li><li>two</li></ul><p>after</p>"
        );
    }

    #[tokio::test]
    async fn top_level_text_is_inserted_directly() {
        let mut editor = MemoryEditor::new();
        editor.seed_paragraph("start: ");
        apply(&mut editor, "plain tail").await;
        assert_eq!(editor.to_html(), "<p>start: plain tail</p>");
    }

    #[tokio::test]
    async fn consecutive_fragments_share_one_cursor() {
        let mut editor = MemoryEditor::new();
        let cancel = CancellationToken::new();
        let mut inserter = inserter();
        inserter
            .apply_fragment(&mut editor, "<p>first</p>", &cancel)
            .await
            .unwrap();
        // Move the live selection away; the inserter must ignore it.
        let root = editor.root();
        editor.set_selection(scribe_document::Position::new(root, 0));
        inserter
            .apply_fragment(&mut editor, "<p>second</p>", &cancel)
            .await
            .unwrap();
        assert_eq!(editor.to_html(), "<p>first</p><p>second</p>");
    }

    #[tokio::test]
    async fn rejected_element_drops_fragment_but_not_session() {
        let mut editor = MemoryEditor::new();
        let cancel = CancellationToken::new();
        let mut inserter = inserter();
        // "video" is not in the allowed vocabulary.
        inserter
            .apply_fragment(&mut editor, "<video>x</video>", &cancel)
            .await
            .unwrap();
        inserter
            .apply_fragment(&mut editor, "<p>still going</p>", &cancel)
            .await
            .unwrap();
        assert_eq!(editor.to_html(), "<p>still going</p>");
    }

    #[tokio::test]
    async fn image_inside_paragraph_is_atomic() {
        let mut editor = MemoryEditor::new();
        apply(&mut editor, "<p>see <img src=\"x.png\"> here</p>").await;
        assert_eq!(editor.to_html(), "<p>see <img src=\"x.png\"> here</p>");
    }

    #[tokio::test]
    async fn blockquote_is_atomic() {
        let mut editor = MemoryEditor::new();
        apply(&mut editor, "<blockquote><p>quoted</p></blockquote>").await;
        assert_eq!(editor.to_html(), "<blockquote><p>quoted</p></blockquote>");
    }

    #[tokio::test]
    async fn cancellation_stops_mid_typing() {
        let mut editor = MemoryEditor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut inserter = inserter();
        let result = inserter
            .apply_fragment(&mut editor, "<p>abc</p>", &cancel)
            .await;
        assert_eq!(result, Err(SessionCancelled));
        // At most one character landed before the cancel was observed.
        assert!(editor.to_html().len() <= "<p>a</p>".len());
    }
}
