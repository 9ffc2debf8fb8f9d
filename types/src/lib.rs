//! Core domain types for Scribe.
//!
//! This crate holds the data that flows between the budgeting, streaming, and
//! insertion layers: reference documents, the prompt envelope, stream events,
//! the transport error taxonomy, and validated engine settings. No IO, no
//! async — everything here is constructible and testable in isolation.

pub mod error;
pub mod settings;

pub use error::{StreamError, StreamErrorKind};
pub use settings::{Settings, SettingsError};

/// A fetched external source the user referenced in their request.
///
/// Produced by the reference fetcher, then mutated by the budget allocator:
/// `token_budget` records the share it was granted and `content` is trimmed
/// down to that share. Consumed once per request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDocument {
    /// Source URL, kept for tagging the reference block in the prompt.
    pub url: String,
    /// Raw fetched text, possibly truncated by budgeting.
    pub content: String,
    /// Token share granted by the allocator. `None` until budgeting runs.
    pub token_budget: Option<u32>,
}

impl ReferenceDocument {
    #[must_use]
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            token_budget: None,
        }
    }
}

/// The fully assembled model input for one generation request.
///
/// Immutable once built. Retries re-send the same envelope verbatim, and the
/// rendered wire text is a pure function of the fields, so identical inputs
/// produce byte-identical requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEnvelope {
    /// System rules: persona, response language, allowed markup, integration
    /// directives.
    pub system_instructions: String,
    /// The user's task, with any leading slash-command marker stripped.
    pub task: String,
    /// Budget-trimmed surrounding document text. May be empty.
    pub context: String,
    /// References that survived budgeting, already trimmed to their shares.
    pub references: Vec<ReferenceDocument>,
}

impl PromptEnvelope {
    /// Render the user-role message content.
    ///
    /// Block order is fixed: TASK, then CONTEXT (only when non-empty), then
    /// one REFERENCE block per surviving reference tagged with its URL.
    #[must_use]
    pub fn user_content(&self) -> String {
        let mut out = String::new();
        out.push_str("TASK:\n");
        out.push_str(&self.task);

        if !self.context.is_empty() {
            out.push_str("\n\nCONTEXT:\n");
            out.push_str(&self.context);
        }

        for reference in &self.references {
            out.push_str("\n\nREFERENCE (");
            out.push_str(&reference.url);
            out.push_str("):\n");
            out.push_str(&reference.content);
        }

        out
    }
}

/// Events emitted by the streaming transport layer.
///
/// The wire reader normalizes the SSE token-delta stream into this shape;
/// everything downstream (fragment assembly, insertion) consumes these and
/// never sees the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta(String),
    /// Stream completed successfully.
    Done,
    /// Stream terminated with a classified transport error.
    Error(StreamError),
}
