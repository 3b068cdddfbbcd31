//! Content items and the collaborators that supply and rank them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strata_core::Role;

use crate::estimate_tokens;
use crate::profile::RoleProfile;

/// A unit of content that may be attached to a request. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub tags: Vec<String>,
    pub estimated_token_cost: u32,
    /// Collaborator-supplied relevance prior in `[0, 1]`.
    pub base_relevance: f64,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, tags: &[&str], estimated_token_cost: u32) -> Self {
        Self {
            id: id.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            estimated_token_cost,
            base_relevance: 0.0,
        }
    }

    /// Item whose cost is estimated from its text.
    pub fn from_text(id: impl Into<String>, tags: &[&str], text: &str) -> Self {
        Self::new(id, tags, estimate_tokens(text))
    }

    pub fn with_base_relevance(mut self, relevance: f64) -> Self {
        self.base_relevance = relevance;
        self
    }
}

/// An item with its relevance for one `(role, intent)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub score: f64,
}

/// Scores content for a role and intent. Must be deterministic.
pub trait ContentRanker: Send + Sync {
    fn rank(&self, profile: &RoleProfile, intent: &str, pool: &[ContentItem]) -> Vec<ScoredItem>;
}

/// Supplies the candidate pool for a request.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn content_for(&self, role: Role, intent: &str) -> Vec<ContentItem>;
}

// ============================================================================
// TAG PRIORITY RANKER
// ============================================================================

/// Default ranker.
///
/// `score = tag_weight * tag + intent_weight * overlap + base_weight * base`
/// where `tag` is `1 - position / len` of the item's best tag in the role's
/// priorities (0 if none match), `overlap` is the fraction of the item's tags
/// that appear as words of the intent, and `base` is the item's own prior.
/// Output is sorted by score descending, then id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagPriorityRanker {
    pub tag_weight: f64,
    pub intent_weight: f64,
    pub base_weight: f64,
}

impl Default for TagPriorityRanker {
    fn default() -> Self {
        Self {
            tag_weight: 0.6,
            intent_weight: 0.3,
            base_weight: 0.1,
        }
    }
}

impl TagPriorityRanker {
    pub fn score(&self, profile: &RoleProfile, terms: &BTreeSet<String>, item: &ContentItem) -> f64 {
        let len = profile.content_priorities.len();
        let tag = item
            .tags
            .iter()
            .filter_map(|t| profile.priority_of(t))
            .min()
            .map_or(0.0, |pos| 1.0 - pos as f64 / len as f64);

        let overlap = if item.tags.is_empty() {
            0.0
        } else {
            let matched = item
                .tags
                .iter()
                .filter(|t| terms.contains(&t.to_lowercase()))
                .count();
            matched as f64 / item.tags.len() as f64
        };

        let base = if item.base_relevance.is_finite() {
            item.base_relevance.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.tag_weight * tag + self.intent_weight * overlap + self.base_weight * base
    }
}

/// Lowercased alphanumeric words of `intent`.
pub fn intent_terms(intent: &str) -> BTreeSet<String> {
    intent
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl ContentRanker for TagPriorityRanker {
    fn rank(&self, profile: &RoleProfile, intent: &str, pool: &[ContentItem]) -> Vec<ScoredItem> {
        let terms = intent_terms(intent);
        let mut scored: Vec<ScoredItem> = pool
            .iter()
            .map(|item| ScoredItem {
                score: self.score(profile, &terms, item),
                item: item.clone(),
            })
            .collect();
        sort_ranked(&mut scored);
        scored
    }
}

/// Score descending, then id ascending.
pub(crate) fn sort_ranked(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyst() -> RoleProfile {
        RoleProfile::default_for(Role::Analyst)
    }

    #[test]
    fn test_intent_terms() {
        let terms = intent_terms("Quarterly revenue-trend, by region!");
        assert!(terms.contains("quarterly"));
        assert!(terms.contains("trend"));
        assert!(terms.contains("region"));
        assert!(!terms.contains(""));
    }

    #[test]
    fn test_higher_priority_tag_ranks_first() {
        let pool = vec![
            ContentItem::new("b-expl", &["explanation"], 10),
            ContentItem::new("a-summary", &["summary"], 10),
        ];
        let ranked = TagPriorityRanker::default().rank(&analyst(), "", &pool);
        assert_eq!(ranked[0].item.id, "a-summary");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_intent_overlap_boosts_score() {
        let pool = vec![
            ContentItem::new("x", &["revenue"], 10),
            ContentItem::new("y", &["headcount"], 10),
        ];
        let ranked = TagPriorityRanker::default().rank(&analyst(), "show revenue", &pool);
        assert_eq!(ranked[0].item.id, "x");
    }

    #[test]
    fn test_ties_broken_by_id() {
        let pool = vec![
            ContentItem::new("zeta", &["other"], 10),
            ContentItem::new("alpha", &["other"], 10),
        ];
        let ranked = TagPriorityRanker::default().rank(&analyst(), "", &pool);
        let ids: Vec<&str> = ranked.iter().map(|s| s.item.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_non_finite_base_relevance_ignored() {
        let item = ContentItem::new("n", &[], 1).with_base_relevance(f64::NAN);
        let score = TagPriorityRanker::default().score(&analyst(), &BTreeSet::new(), &item);
        assert_eq!(score, 0.0);
    }
}
