//! Strata Context - Budgeted Context Selection
//!
//! Chooses which content items accompany a request. Each role has a profile
//! with a share of the maximum token budget and an ordered list of content
//! tags it cares about. Items are ranked for `(role, intent)` and selected
//! greedily until the budget is spent.

pub mod content;
pub mod optimizer;
pub mod profile;

pub use content::{
    intent_terms, ContentItem, ContentProvider, ContentRanker, ScoredItem, TagPriorityRanker,
};
pub use optimizer::{
    selection_input_hash, ContextConfig, ContextOptimizer, ContextSelection, SelectionAction,
    SelectionDecision,
};
pub use profile::{RoleProfile, RoleProfiles};

// ============================================================================
// TOKEN UTILITIES
// ============================================================================

/// Estimate token count for text.
/// Rough estimate: ~0.75 tokens per character (English).
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.75).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars * 0.75 = 3.75, ceil = 4
        assert_eq!(estimate_tokens("hello"), 4);
    }

    #[test]
    fn test_content_item_from_text() {
        let item = ContentItem::from_text("intro", &["summary"], &"a".repeat(100));
        assert_eq!(item.estimated_token_cost, 75);
    }
}
