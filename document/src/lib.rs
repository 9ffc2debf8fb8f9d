//! Host-document capability interface.
//!
//! The generation engine never touches a concrete editor implementation. It
//! talks to the document through the narrow [`DocumentEditor`] trait:
//! position and node primitives, element/text insertion, selection access,
//! and the document-wide read-only lock. This keeps insertion strategy and
//! cursor bookkeeping testable against the in-memory implementation in
//! [`memory`].
//!
//! # Position model
//!
//! A [`Position`] addresses a point inside an element node: `offset` counts
//! each child element as one unit and each character of a text child as one
//! unit. Implementations return advanced positions from every insertion, so
//! callers thread positions instead of computing offsets themselves.

pub mod memory;

use std::collections::BTreeSet;

use thiserror::Error;

/// Opaque handle to an element node in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(u64);

impl NodeRef {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A point inside an element node. See the module docs for offset units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: NodeRef,
    pub offset: usize,
}

impl Position {
    #[must_use]
    pub const fn new(node: NodeRef, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// A span between two positions inside the same element node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn is_collapsed(&self) -> bool {
        self.start.offset == self.end.offset && self.start.node.0 == self.end.node.0
    }
}

#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeRef),
    #[error("offset {offset} out of bounds in node {node:?}")]
    InvalidPosition { node: NodeRef, offset: usize },
    #[error("schema rejects element <{0}>")]
    SchemaRejected(String),
    #[error("range endpoints must share a parent node")]
    DisjointRange,
}

/// Capability interface over the host document.
///
/// The engine holds one of these for the lifetime of a generation session.
/// All mutation goes through returned positions; no method exposes the
/// document's internal node tree.
pub trait DocumentEditor {
    /// The collapsed insertion point of the current selection.
    fn selection_position(&self) -> Position;

    /// The current selection when it is non-collapsed.
    fn selection_range(&self) -> Option<Range>;

    fn set_selection(&mut self, position: Position);

    /// Insert an element of `kind` at `position`. Returns a handle to the new
    /// node; its content is empty.
    fn insert_element(
        &mut self,
        kind: &str,
        attrs: &[(String, String)],
        position: Position,
    ) -> Result<NodeRef, DocumentError>;

    /// Insert text at `position`. Returns the position just after the
    /// inserted text.
    fn insert_text(&mut self, text: &str, position: Position) -> Result<Position, DocumentError>;

    /// Remove the content covered by `range`.
    fn remove_range(&mut self, range: Range) -> Result<(), DocumentError>;

    /// The position at the end of `node`'s content.
    fn position_inside_end(&self, node: NodeRef) -> Result<Position, DocumentError>;

    /// The position in `node`'s parent just after `node`.
    fn position_after(&self, node: NodeRef) -> Result<Position, DocumentError>;

    /// Place a named read-only lock on the document. Locks are counted by id;
    /// the document stays locked until every id is released.
    fn enable_read_only(&mut self, lock_id: &str);

    fn disable_read_only(&mut self, lock_id: &str);

    /// Element kinds the document schema accepts, used to instruct the model.
    fn allowed_markup_vocabulary(&self) -> BTreeSet<String>;

    /// Whether the document has any content at all.
    fn is_empty(&self) -> bool;

    /// The document rendered as plain text, block contents separated by
    /// newlines. Used for context budgeting.
    fn plain_text(&self) -> String;

    /// Byte offset of the selection position within [`Self::plain_text`].
    fn selection_text_offset(&self) -> usize;
}
