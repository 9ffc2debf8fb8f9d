//! In-memory document editor.
//!
//! A small element/text tree implementing [`DocumentEditor`], enough to
//! exercise every insertion strategy and the cursor bookkeeping without a
//! real editor. Tests assert against [`MemoryEditor::to_html`].

use std::collections::BTreeSet;

use crate::{DocumentEditor, DocumentError, NodeRef, Position, Range};

/// Kinds serialized without a closing tag when empty.
const VOID_KINDS: &[&str] = &["img", "br", "hr"];

/// Containers whose children are newline-separated in the plain-text view.
const NEWLINE_SEPARATED: &[&str] = &["$root", "ul", "ol", "table", "tr"];

const DEFAULT_ALLOWED: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "ul", "ol", "li", "table", "thead", "tbody", "tr", "td", "th",
    "blockquote", "pre", "img", "figure", "form", "a", "strong", "em", "code", "span", "br", "hr",
];

#[derive(Debug, Clone)]
enum Payload {
    Element {
        kind: String,
        attrs: Vec<(String, String)>,
        children: Vec<NodeRef>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeRef>,
    payload: Payload,
}

/// Where an offset lands within an element's children.
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// At a node boundary, before the child at `index`.
    Boundary { index: usize },
    /// Inside the text child at `index`, `chars` characters in.
    InText { index: usize, chars: usize },
}

/// In-memory [`DocumentEditor`] implementation.
#[derive(Debug)]
pub struct MemoryEditor {
    nodes: Vec<NodeData>,
    root: NodeRef,
    selection: Position,
    selection_end: Option<Position>,
    locks: BTreeSet<String>,
    allowed: BTreeSet<String>,
}

impl Default for MemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEditor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_allowed_markup(DEFAULT_ALLOWED.iter().map(|s| (*s).to_string()).collect())
    }

    #[must_use]
    pub fn with_allowed_markup(allowed: BTreeSet<String>) -> Self {
        let root = NodeRef::new(0);
        Self {
            nodes: vec![NodeData {
                parent: None,
                payload: Payload::Element {
                    kind: "$root".to_string(),
                    attrs: Vec::new(),
                    children: Vec::new(),
                },
            }],
            root,
            selection: Position::new(root, 0),
            selection_end: None,
            locks: BTreeSet::new(),
            allowed,
        }
    }

    #[must_use]
    pub const fn root(&self) -> NodeRef {
        self.root
    }

    /// The position after the last top-level block.
    #[must_use]
    pub fn end_of_document(&self) -> Position {
        Position::new(self.root, self.content_len(self.root).unwrap_or(0))
    }

    /// Append a paragraph with `text` and place the selection at its end.
    /// Test seeding helper; goes through the public mutation API.
    pub fn seed_paragraph(&mut self, text: &str) -> NodeRef {
        let node = self
            .insert_element("p", &[], self.end_of_document())
            .expect("paragraph kind must be allowed");
        let inside = self
            .position_inside_end(node)
            .expect("fresh node must resolve");
        let end = self
            .insert_text(text, inside)
            .expect("text insertion into fresh paragraph");
        self.set_selection(end);
        node
    }

    /// Make the current selection a non-collapsed range.
    pub fn select_range(&mut self, range: Range) {
        self.selection = range.start;
        self.selection_end = Some(range.end);
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.locks.is_empty()
    }

    /// Serialize the document body as HTML, for test assertions.
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.render_html(self.root, &mut out);
        out
    }

    fn data(&self, node: NodeRef) -> Result<&NodeData, DocumentError> {
        self.nodes
            .get(node.id() as usize)
            .ok_or(DocumentError::UnknownNode(node))
    }

    fn children_of(&self, node: NodeRef) -> Result<&[NodeRef], DocumentError> {
        match &self.data(node)?.payload {
            Payload::Element { children, .. } => Ok(children),
            Payload::Text(_) => Err(DocumentError::InvalidPosition { node, offset: 0 }),
        }
    }

    fn unit_len(&self, node: NodeRef) -> usize {
        match &self.nodes[node.id() as usize].payload {
            Payload::Element { .. } => 1,
            Payload::Text(text) => text.chars().count(),
        }
    }

    fn content_len(&self, node: NodeRef) -> Result<usize, DocumentError> {
        Ok(self
            .children_of(node)?
            .iter()
            .map(|c| self.unit_len(*c))
            .sum())
    }

    fn locate(&self, position: Position) -> Result<Slot, DocumentError> {
        let children = self.children_of(position.node)?;
        let mut unit = 0usize;
        for (index, child) in children.iter().enumerate() {
            if position.offset == unit {
                return Ok(Slot::Boundary { index });
            }
            let len = self.unit_len(*child);
            if position.offset < unit + len {
                match &self.nodes[child.id() as usize].payload {
                    Payload::Text(_) => {
                        return Ok(Slot::InText {
                            index,
                            chars: position.offset - unit,
                        });
                    }
                    Payload::Element { .. } => {
                        return Err(DocumentError::InvalidPosition {
                            node: position.node,
                            offset: position.offset,
                        });
                    }
                }
            }
            unit += len;
        }
        if position.offset == unit {
            return Ok(Slot::Boundary {
                index: children.len(),
            });
        }
        Err(DocumentError::InvalidPosition {
            node: position.node,
            offset: position.offset,
        })
    }

    fn alloc(&mut self, parent: NodeRef, payload: Payload) -> NodeRef {
        let id = NodeRef::new(self.nodes.len() as u64);
        self.nodes.push(NodeData {
            parent: Some(parent),
            payload,
        });
        id
    }

    fn child_list_mut(&mut self, node: NodeRef) -> &mut Vec<NodeRef> {
        match &mut self.nodes[node.id() as usize].payload {
            Payload::Element { children, .. } => children,
            Payload::Text(_) => unreachable!("callers verify the node is an element"),
        }
    }

    fn text_mut(&mut self, node: NodeRef) -> &mut String {
        match &mut self.nodes[node.id() as usize].payload {
            Payload::Text(text) => text,
            Payload::Element { .. } => unreachable!("callers verify the node is text"),
        }
    }

    fn is_text(&self, node: NodeRef) -> bool {
        matches!(self.nodes[node.id() as usize].payload, Payload::Text(_))
    }

    /// Remove exactly one unit at `offset` inside `node`.
    fn remove_unit_at(&mut self, node: NodeRef, offset: usize) -> Result<(), DocumentError> {
        match self.locate(Position::new(node, offset))? {
            Slot::Boundary { index } => {
                let children = self.children_of(node)?;
                let Some(&child) = children.get(index) else {
                    return Err(DocumentError::InvalidPosition { node, offset });
                };
                if self.is_text(child) {
                    let text = self.text_mut(child);
                    let byte = byte_at_char(text, 0);
                    let next = text[byte..]
                        .char_indices()
                        .nth(1)
                        .map_or(text.len(), |(i, _)| byte + i);
                    text.replace_range(byte..next, "");
                    if text.is_empty() {
                        self.child_list_mut(node).remove(index);
                    }
                } else {
                    self.child_list_mut(node).remove(index);
                }
            }
            Slot::InText { index, chars } => {
                let child = self.children_of(node)?[index];
                let text = self.text_mut(child);
                let start = byte_at_char(text, chars);
                let end = text[start..]
                    .char_indices()
                    .nth(1)
                    .map_or(text.len(), |(i, _)| start + i);
                text.replace_range(start..end, "");
                if text.is_empty() {
                    self.child_list_mut(node).remove(index);
                }
            }
        }
        Ok(())
    }

    fn render_html(&self, node: NodeRef, out: &mut String) {
        match &self.nodes[node.id() as usize].payload {
            Payload::Text(text) => out.push_str(text),
            Payload::Element {
                kind,
                attrs,
                children,
            } => {
                let is_root = kind == "$root";
                if !is_root {
                    out.push('<');
                    out.push_str(kind);
                    for (name, value) in attrs {
                        out.push(' ');
                        out.push_str(name);
                        out.push_str("=\"");
                        out.push_str(value);
                        out.push('"');
                    }
                    out.push('>');
                    if VOID_KINDS.contains(&kind.as_str()) && children.is_empty() {
                        return;
                    }
                }
                for child in children {
                    self.render_html(*child, out);
                }
                if !is_root {
                    out.push_str("</");
                    out.push_str(kind);
                    out.push('>');
                }
            }
        }
    }

    /// Walk the tree emitting plain text; when `target` is reached, record
    /// the byte offset in `found`.
    fn render_plain(
        &self,
        node: NodeRef,
        target: Option<Position>,
        out: &mut String,
        found: &mut Option<usize>,
    ) {
        let Payload::Element { kind, children, .. } = &self.nodes[node.id() as usize].payload
        else {
            return;
        };
        let separated = NEWLINE_SEPARATED.contains(&kind.as_str());
        let mut unit = 0usize;
        for (i, child) in children.iter().enumerate() {
            if let Some(t) = target
                && t.node == node
                && t.offset == unit
                && found.is_none()
            {
                *found = Some(out.len());
            }
            match &self.nodes[child.id() as usize].payload {
                Payload::Text(text) => {
                    let chars = text.chars().count();
                    if let Some(t) = target
                        && t.node == node
                        && t.offset > unit
                        && t.offset <= unit + chars
                        && found.is_none()
                    {
                        *found = Some(out.len() + byte_at_char(text, t.offset - unit));
                    }
                    out.push_str(text);
                    unit += chars;
                }
                Payload::Element { .. } => {
                    self.render_plain(*child, target, out, found);
                    unit += 1;
                }
            }
            if separated && i + 1 < children.len() {
                out.push('\n');
            }
        }
        if let Some(t) = target
            && t.node == node
            && t.offset == unit
            && found.is_none()
        {
            *found = Some(out.len());
        }
    }
}

fn byte_at_char(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(i, _)| i)
}

impl DocumentEditor for MemoryEditor {
    fn selection_position(&self) -> Position {
        self.selection
    }

    fn selection_range(&self) -> Option<Range> {
        let end = self.selection_end?;
        let range = Range::new(self.selection, end);
        if range.is_collapsed() { None } else { Some(range) }
    }

    fn set_selection(&mut self, position: Position) {
        self.selection = position;
        self.selection_end = None;
    }

    fn insert_element(
        &mut self,
        kind: &str,
        attrs: &[(String, String)],
        position: Position,
    ) -> Result<NodeRef, DocumentError> {
        if !self.allowed.contains(kind) {
            return Err(DocumentError::SchemaRejected(kind.to_string()));
        }
        let index = match self.locate(position)? {
            Slot::Boundary { index } => index,
            Slot::InText { index, chars } => {
                // Split the text node so the element lands between the halves.
                let child = self.children_of(position.node)?[index];
                let text = self.text_mut(child);
                let byte = byte_at_char(text, chars);
                let tail = text.split_off(byte);
                if tail.is_empty() {
                    index + 1
                } else {
                    let tail_node = self.alloc(position.node, Payload::Text(tail));
                    self.child_list_mut(position.node).insert(index + 1, tail_node);
                    index + 1
                }
            }
        };
        let node = self.alloc(
            position.node,
            Payload::Element {
                kind: kind.to_string(),
                attrs: attrs.to_vec(),
                children: Vec::new(),
            },
        );
        self.child_list_mut(position.node).insert(index, node);
        Ok(node)
    }

    fn insert_text(&mut self, text: &str, position: Position) -> Result<Position, DocumentError> {
        if text.is_empty() {
            return Ok(position);
        }
        match self.locate(position)? {
            Slot::InText { index, chars } => {
                let child = self.children_of(position.node)?[index];
                let target = self.text_mut(child);
                let byte = byte_at_char(target, chars);
                target.insert_str(byte, text);
            }
            Slot::Boundary { index } => {
                let children = self.children_of(position.node)?;
                let before = index.checked_sub(1).map(|i| children[i]);
                let at = children.get(index).copied();
                if let Some(prev) = before
                    && self.is_text(prev)
                {
                    self.text_mut(prev).push_str(text);
                } else if let Some(next) = at
                    && self.is_text(next)
                {
                    self.text_mut(next).insert_str(0, text);
                } else {
                    let node = self.alloc(position.node, Payload::Text(text.to_string()));
                    self.child_list_mut(position.node).insert(index, node);
                }
            }
        }
        Ok(Position::new(
            position.node,
            position.offset + text.chars().count(),
        ))
    }

    fn remove_range(&mut self, range: Range) -> Result<(), DocumentError> {
        if range.start.node != range.end.node {
            return Err(DocumentError::DisjointRange);
        }
        let (start, end) = if range.start.offset <= range.end.offset {
            (range.start.offset, range.end.offset)
        } else {
            (range.end.offset, range.start.offset)
        };
        for _ in start..end {
            self.remove_unit_at(range.start.node, start)?;
        }
        self.selection = Position::new(range.start.node, start);
        self.selection_end = None;
        Ok(())
    }

    fn position_inside_end(&self, node: NodeRef) -> Result<Position, DocumentError> {
        Ok(Position::new(node, self.content_len(node)?))
    }

    fn position_after(&self, node: NodeRef) -> Result<Position, DocumentError> {
        let parent = self
            .data(node)?
            .parent
            .ok_or(DocumentError::UnknownNode(node))?;
        let children = self.children_of(parent)?;
        let mut unit = 0usize;
        for child in children {
            unit += self.unit_len(*child);
            if *child == node {
                return Ok(Position::new(parent, unit));
            }
        }
        Err(DocumentError::UnknownNode(node))
    }

    fn enable_read_only(&mut self, lock_id: &str) {
        self.locks.insert(lock_id.to_string());
    }

    fn disable_read_only(&mut self, lock_id: &str) {
        if !self.locks.remove(lock_id) {
            tracing::warn!(lock_id, "released a read-only lock that was not held");
        }
    }

    fn allowed_markup_vocabulary(&self) -> BTreeSet<String> {
        self.allowed.clone()
    }

    fn is_empty(&self) -> bool {
        self.children_of(self.root)
            .map(<[NodeRef]>::is_empty)
            .unwrap_or(true)
    }

    fn plain_text(&self) -> String {
        let mut out = String::new();
        let mut found = None;
        self.render_plain(self.root, None, &mut out, &mut found);
        out
    }

    fn selection_text_offset(&self) -> usize {
        let mut out = String::new();
        let mut found = None;
        self.render_plain(self.root, Some(self.selection), &mut out, &mut found);
        found.unwrap_or(out.len())
    }
}
