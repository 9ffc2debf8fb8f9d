//! Prompt assembly.
//!
//! Composes the final model input from budgeted pieces. Output is
//! byte-identical for identical inputs and an identical allowed-tag set, so
//! golden-prompt tests stay stable across runs.

use std::collections::BTreeSet;

use scribe_types::{PromptEnvelope, ReferenceDocument};

const PERSONA: &str = "You are a writing assistant embedded in a rich-text document editor.";

const INTEGRATION_DIRECTIVES: &str = "Integrate the response seamlessly at the insertion point. \
Do not restate or summarize the provided context, and do not address the user.";

/// Builds [`PromptEnvelope`]s from budgeted context pieces.
///
/// The allowed-tag set comes from the host document's schema; keeping it in a
/// `BTreeSet` makes the rendered instruction order deterministic.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    language: String,
    allowed_tags: BTreeSet<String>,
}

impl PromptAssembler {
    #[must_use]
    pub fn new(language: impl Into<String>, allowed_tags: BTreeSet<String>) -> Self {
        Self {
            language: language.into(),
            allowed_tags,
        }
    }

    /// Compose the envelope for one request.
    ///
    /// The task keeps its literal text with any leading slash-command marker
    /// stripped. The integrate-seamlessly directives are added only when the
    /// editor already has content to integrate with.
    #[must_use]
    pub fn assemble(
        &self,
        task: &str,
        editor_context: &str,
        references: Vec<ReferenceDocument>,
        is_editor_empty: bool,
    ) -> PromptEnvelope {
        let task = task.strip_prefix('/').unwrap_or(task);

        let mut rules = String::from(PERSONA);
        rules.push_str("\nRespond in ");
        rules.push_str(&self.language);
        rules.push('.');

        rules.push_str("\nFormat the response as HTML fragments using only these tags: ");
        let mut first = true;
        for tag in &self.allowed_tags {
            if !first {
                rules.push_str(", ");
            }
            rules.push('<');
            rules.push_str(tag);
            rules.push('>');
            first = false;
        }
        rules.push_str(". Never emit <html>, <head>, or <body>.");

        if !is_editor_empty {
            rules.push('\n');
            rules.push_str(INTEGRATION_DIRECTIVES);
        }

        PromptEnvelope {
            system_instructions: rules,
            task: task.to_string(),
            context: editor_context.to_string(),
            references,
        }
    }
}
