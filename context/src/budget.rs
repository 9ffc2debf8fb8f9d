//! Context window budgeting.
//!
//! One fixed token budget per request is divided between the surrounding
//! editor text and any fetched reference documents. References are granted
//! shares in ascending cost order (water-filling), so many small sources are
//! never starved by one large one.

use scribe_types::ReferenceDocument;

use crate::sentence::{Keep, trim_to_token_budget};
use crate::token_counter::TokenCounter;

/// Result of dividing the context window for one request.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Budget-trimmed surrounding document text, nearest the cursor.
    pub editor_context: String,
    /// References with `token_budget` set and content trimmed to the grant.
    /// References whose grant left no content are dropped.
    pub references: Vec<ReferenceDocument>,
}

/// Divides a fixed context budget between editor text and references.
#[derive(Debug, Clone, Copy)]
pub struct BudgetAllocator {
    counter: TokenCounter,
    editor_ratio: f32,
}

impl BudgetAllocator {
    /// `editor_ratio` is the fraction of the total budget reserved for
    /// surrounding-document context (at most; unused tokens go to references).
    #[must_use]
    pub fn new(editor_ratio: f32) -> Self {
        Self {
            counter: TokenCounter::new(),
            editor_ratio,
        }
    }

    /// Divide `total_budget` between the editor text around `cursor_offset`
    /// (a byte offset into `editor_text`) and the given references.
    ///
    /// Invariant: the editor share plus the sum of granted reference shares
    /// never exceeds `total_budget`.
    #[must_use]
    pub fn allocate(
        &self,
        total_budget: u32,
        editor_text: &str,
        cursor_offset: usize,
        references: Vec<ReferenceDocument>,
    ) -> Allocation {
        let editor_cost = self.counter.count_str(editor_text);
        let ratio_share = (f64::from(total_budget) * f64::from(self.editor_ratio)).floor() as u32;
        let editor_share = ratio_share.min(editor_cost);
        let mut remaining = total_budget - editor_share;

        tracing::debug!(
            total_budget,
            editor_cost,
            editor_share,
            reference_count = references.len(),
            "allocating context budget"
        );

        // Cheapest sources first: a full grant to a small source costs little,
        // and the per-item cap only ever shrinks what the large ones get.
        let mut costed: Vec<(u32, ReferenceDocument)> = references
            .into_iter()
            .map(|r| (self.counter.count_str(&r.content), r))
            .collect();
        costed.sort_by_key(|(cost, _)| *cost);

        let total_items = costed.len() as u32;
        let mut granted = Vec::with_capacity(costed.len());
        for (index, (cost, mut reference)) in costed.into_iter().enumerate() {
            let items_left = total_items - index as u32;
            let per_item = remaining / items_left;
            let grant = if cost <= per_item { cost } else { per_item };
            remaining -= grant;
            reference.token_budget = Some(grant);

            if grant < cost {
                tracing::debug!(url = %reference.url, cost, grant, "truncating reference");
                reference.content = trim_to_token_budget(&reference.content, grant, Keep::Head)
                    .trim()
                    .to_string();
            }
            if !reference.content.is_empty() {
                granted.push(reference);
            }
        }

        Allocation {
            editor_context: self.extract_editor_context(editor_text, cursor_offset, editor_share),
            references: granted,
        }
    }

    /// Extract the surrounding-document context around the insertion point.
    ///
    /// The text splits at the nearest newline at or after the cursor into a
    /// "before" and "after" span. Each side gets up to half the editor share;
    /// whatever one side leaves unused is donated to the other. The before
    /// side is trimmed from its end backward (content nearest the cursor
    /// wins), the after side from its start forward.
    fn extract_editor_context(&self, text: &str, cursor_offset: usize, editor_share: u32) -> String {
        if editor_share == 0 || text.trim().is_empty() {
            return String::new();
        }

        let mut cursor = cursor_offset.min(text.len());
        while cursor > 0 && !text.is_char_boundary(cursor) {
            cursor -= 1;
        }

        let split = text[cursor..]
            .find('\n')
            .map_or(text.len(), |i| cursor + i);
        let before = &text[..split];
        let after = &text[split..];

        let half = editor_share / 2;
        let before_cost = self.counter.count_str(before);
        let after_cost = self.counter.count_str(after);

        let mut before_budget = half.min(before_cost);
        let after_budget = (editor_share - before_budget).min(after_cost);
        before_budget = (editor_share - after_budget).min(before_cost);

        let kept_before = trim_to_token_budget(before, before_budget, Keep::Tail);
        let kept_after = trim_to_token_budget(after, after_budget, Keep::Head);

        let mut joined = String::with_capacity(kept_before.len() + kept_after.len());
        joined.push_str(kept_before);
        joined.push_str(kept_after);
        joined.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::BudgetAllocator;
    use crate::token_counter::TokenCounter;
    use scribe_types::ReferenceDocument;

    /// A reference of `sentences` short sentences, costing 4 tokens each.
    fn long_reference(url: &str, sentences: usize) -> ReferenceDocument {
        ReferenceDocument::new(url, "aa bb cc. ".repeat(sentences).trim_end().to_string())
    }

    #[test]
    fn budget_invariant_holds() {
        let allocator = BudgetAllocator::new(0.3);
        let editor_text = "Some text in the editor. More text follows here.";
        let references = vec![
            long_reference("https://a.example", 10),
            long_reference("https://b.example", 100),
            long_reference("https://c.example", 1),
        ];

        let total = 100;
        let allocation = allocator.allocate(total, editor_text, 10, references);

        let counter = TokenCounter::new();
        let editor_share = counter
            .count_str(editor_text)
            .min((f64::from(total) * 0.3).floor() as u32);
        let granted: u32 = allocation
            .references
            .iter()
            .map(|r| r.token_budget.unwrap_or(0))
            .sum();
        assert!(editor_share + granted <= total);
    }

    #[test]
    fn water_filling_never_starves_cheap_sources() {
        let allocator = BudgetAllocator::new(0.3);
        // No editor text, so the full budget of 20 goes to references.
        // Costs are [1000, 5, 5]; the two cheap sources must be granted in
        // full (5 + 5) before the big one is capped to the remainder (10).
        let references = vec![
            long_reference("https://big.example", 250),
            ReferenceDocument::new("https://small-a.example", "alpha beta gamma delta."),
            ReferenceDocument::new("https://small-b.example", "epsilon zeta eta theta."),
        ];

        let allocation = allocator.allocate(20, "", 0, references);

        let by_url = |url: &str| {
            allocation
                .references
                .iter()
                .find(|r| r.url == url)
                .map(|r| r.token_budget.unwrap())
        };
        assert_eq!(by_url("https://small-a.example"), Some(5));
        assert_eq!(by_url("https://small-b.example"), Some(5));
        assert_eq!(by_url("https://big.example"), Some(10));
    }

    #[test]
    fn full_grant_leaves_content_untouched() {
        let allocator = BudgetAllocator::new(0.3);
        let original = "Tiny source.";
        let allocation = allocator.allocate(
            1000,
            "",
            0,
            vec![ReferenceDocument::new("https://t.example", original)],
        );
        assert_eq!(allocation.references[0].content, original);
    }

    #[test]
    fn truncated_reference_respects_sentence_bounds() {
        let allocator = BudgetAllocator::new(0.3);
        let content = "First sentence here. Second sentence follows. Third sentence ends.";
        let references = vec![ReferenceDocument::new("https://s.example", content)];

        let allocation = allocator.allocate(8, "", 0, references);
        let kept = &allocation.references[0].content;
        assert!(kept.len() < content.len());
        assert!(kept.ends_with('.'), "kept {kept:?} must end on a sentence");
    }

    #[test]
    fn editor_share_caps_at_actual_cost() {
        let allocator = BudgetAllocator::new(0.3);
        // 2 tokens of editor text against a 1000 budget: share is 2, leaving
        // 998 for references.
        let references = vec![long_reference("https://r.example", 500)];
        let allocation = allocator.allocate(1000, "Hello world", 5, references);
        assert_eq!(allocation.references[0].token_budget, Some(998));
        assert_eq!(allocation.editor_context, "Hello world");
    }

    #[test]
    fn editor_context_keeps_text_nearest_cursor() {
        let allocator = BudgetAllocator::new(0.5);
        let text = "Far away sentence one. Far away sentence two. Near the cursor now.\nAfter line one. After line two.";
        let cursor = text.find("now.").unwrap() + 4;

        let allocation = allocator.allocate(20, text, cursor, Vec::new());
        let ctx = &allocation.editor_context;
        assert!(
            ctx.contains("Near the cursor now."),
            "before-side must keep its tail: {ctx:?}"
        );
        assert!(
            ctx.contains("After line one."),
            "after-side must keep its head: {ctx:?}"
        );
        assert!(!ctx.contains("Far away sentence one."));
    }

    #[test]
    fn empty_editor_text_yields_empty_context() {
        let allocator = BudgetAllocator::new(0.3);
        let allocation = allocator.allocate(100, "   ", 0, Vec::new());
        assert_eq!(allocation.editor_context, "");
    }
}
