//! Greedy token-budgeted selection.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{content_hash_hex, ConfigError, StrataResult};

use crate::content::{sort_ranked, ContentItem, ContentRanker, TagPriorityRanker};
use crate::profile::RoleProfile;

/// Default maximum context size in tokens, before the role fraction applies.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 4000;

/// Default fraction of the budget below which selection stops.
pub const DEFAULT_MIN_USEFUL_FRACTION: f64 = 0.1;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    pub max_context_tokens: u32,
    /// Stop once remaining budget drops below this share of the total.
    pub min_useful_fraction: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            min_useful_fraction: DEFAULT_MIN_USEFUL_FRACTION,
        }
    }
}

impl ContextConfig {
    /// Create ContextConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CONTEXT_MAX_TOKENS` (default: 4000)
    /// - `STRATA_CONTEXT_MIN_USEFUL_FRACTION` (default: 0.1)
    pub fn from_env() -> Self {
        let max_context_tokens = std::env::var("STRATA_CONTEXT_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);

        let min_useful_fraction = std::env::var("STRATA_CONTEXT_MIN_USEFUL_FRACTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MIN_USEFUL_FRACTION);

        Self {
            max_context_tokens,
            min_useful_fraction,
        }
    }

    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_min_useful_fraction(mut self, fraction: f64) -> Self {
        self.min_useful_fraction = fraction;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if !(0.0..=1.0).contains(&self.min_useful_fraction) {
            return Err(ConfigError::invalid(
                "min_useful_fraction",
                self.min_useful_fraction,
                "must be within 0..=1",
            )
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// What happened to an item during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionAction {
    /// Item fit and was taken
    Include,
    /// Item did not fit the remaining budget
    Skip,
    /// Remaining budget fell below the useful minimum
    Stop,
}

/// Audit record for one selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub action: SelectionAction,
    pub item_id: Option<String>,
    pub tokens: u32,
    pub reason: String,
}

/// Result of [`ContextOptimizer::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSelection {
    pub items: Vec<ContentItem>,
    pub total_tokens: u32,
    pub budget: u32,
    pub trace: Vec<SelectionDecision>,
}

impl ContextSelection {
    pub fn empty(budget: u32) -> Self {
        Self {
            items: Vec::new(),
            total_tokens: 0,
            budget,
            trace: Vec::new(),
        }
    }

    pub fn remaining_tokens(&self) -> u32 {
        self.budget.saturating_sub(self.total_tokens)
    }

    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }
}

/// Selects a budget-constrained subset of content for a request.
#[derive(Clone)]
pub struct ContextOptimizer {
    config: ContextConfig,
    ranker: Arc<dyn ContentRanker>,
}

impl std::fmt::Debug for ContextOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOptimizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextOptimizer {
    pub fn new(config: ContextConfig, ranker: Arc<dyn ContentRanker>) -> StrataResult<Self> {
        config.validate()?;
        Ok(Self { config, ranker })
    }

    /// Optimizer using [`TagPriorityRanker`].
    pub fn with_default_ranker(config: ContextConfig) -> StrataResult<Self> {
        Self::new(config, Arc::new(TagPriorityRanker::default()))
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Budget for a role under this optimizer's maximum.
    pub fn budget_for(&self, profile: &RoleProfile) -> u32 {
        profile.token_budget(self.config.max_context_tokens)
    }

    /// Greedy bounded-knapsack selection.
    ///
    /// Walks items by relevance (descending, ties by id) and takes each one
    /// that fits the remaining budget, skipping those that don't. Stops when
    /// the remaining budget drops below `min_useful_fraction * token_budget`
    /// or the pool is exhausted. Identical inputs give identical output.
    pub fn optimize(
        &self,
        profile: &RoleProfile,
        intent: &str,
        pool: &[ContentItem],
        token_budget: u32,
    ) -> ContextSelection {
        let mut ranked = self.ranker.rank(profile, intent, pool);
        sort_ranked(&mut ranked);

        let min_useful = (f64::from(token_budget) * self.config.min_useful_fraction).ceil() as u32;
        let mut selection = ContextSelection::empty(token_budget);

        for scored in ranked {
            let remaining = selection.remaining_tokens();
            if remaining < min_useful {
                selection.trace.push(SelectionDecision {
                    action: SelectionAction::Stop,
                    item_id: None,
                    tokens: remaining,
                    reason: format!(
                        "Remaining {} tokens below useful minimum {}",
                        remaining, min_useful
                    ),
                });
                break;
            }

            let cost = scored.item.estimated_token_cost;
            if cost <= remaining {
                selection.total_tokens += cost;
                selection.trace.push(SelectionDecision {
                    action: SelectionAction::Include,
                    item_id: Some(scored.item.id.clone()),
                    tokens: cost,
                    reason: format!("Fits within budget (score {:.3})", scored.score),
                });
                selection.items.push(scored.item);
            } else {
                selection.trace.push(SelectionDecision {
                    action: SelectionAction::Skip,
                    item_id: Some(scored.item.id.clone()),
                    tokens: 0,
                    reason: format!("Needs {} tokens, only {} available", cost, remaining),
                });
            }
        }

        selection
    }
}

/// Stable digest of everything selection depends on.
///
/// Used in cache keys instead of the selection itself. Pool order does not
/// affect the digest, matching selection which re-sorts the pool.
pub fn selection_input_hash(
    profile: &RoleProfile,
    intent: &str,
    pool: &[ContentItem],
    token_budget: u32,
) -> String {
    let mut items: Vec<String> = pool
        .iter()
        .map(|i| {
            serde_json::json!([i.id, i.tags, i.estimated_token_cost, i.base_relevance]).to_string()
        })
        .collect();
    items.sort();

    let canonical = serde_json::json!({
        "role": profile.role.as_str(),
        "priorities": profile.content_priorities,
        "intent": intent,
        "budget": token_budget,
        "pool": items,
    });
    content_hash_hex(canonical.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Role;

    fn optimizer() -> ContextOptimizer {
        ContextOptimizer::with_default_ranker(ContextConfig::default()).unwrap()
    }

    fn analyst() -> RoleProfile {
        RoleProfile::default_for(Role::Analyst)
    }

    #[test]
    fn test_skips_items_that_do_not_fit_without_stopping() {
        let pool = vec![
            ContentItem::new("a", &["summary"], 60),
            ContentItem::new("b", &["trend"], 50),
            ContentItem::new("c", &["chart"], 30),
        ];
        let selection = optimizer().optimize(&analyst(), "", &pool, 100);
        assert_eq!(selection.item_ids(), vec!["a", "c"]);
        assert_eq!(selection.total_tokens, 90);
        assert_eq!(selection.trace[1].action, SelectionAction::Skip);
    }

    #[test]
    fn test_stops_below_min_useful_fraction() {
        let pool = vec![
            ContentItem::new("a", &["summary"], 95),
            ContentItem::new("b", &["trend"], 1),
        ];
        let selection = optimizer().optimize(&analyst(), "", &pool, 100);
        assert_eq!(selection.item_ids(), vec!["a"]);
        assert_eq!(selection.trace.last().unwrap().action, SelectionAction::Stop);
    }

    #[test]
    fn test_empty_pool_and_zero_budget() {
        let selection = optimizer().optimize(&analyst(), "", &[], 100);
        assert!(selection.items.is_empty());

        let pool = vec![ContentItem::new("a", &["summary"], 1)];
        let selection = optimizer().optimize(&analyst(), "", &pool, 0);
        assert!(selection.items.is_empty());
        assert_eq!(selection.total_tokens, 0);
    }

    #[test]
    fn test_budget_for_role() {
        let opt = ContextOptimizer::with_default_ranker(
            ContextConfig::default().with_max_context_tokens(1000),
        )
        .unwrap();
        assert_eq!(opt.budget_for(&RoleProfile::default_for(Role::DataScientist)), 750);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let config = ContextConfig::default().with_min_useful_fraction(1.5);
        assert!(ContextOptimizer::with_default_ranker(config).is_err());
    }

    #[test]
    fn test_hash_ignores_pool_order_but_not_intent() {
        let a = ContentItem::new("a", &["summary"], 10);
        let b = ContentItem::new("b", &["trend"], 20);
        let profile = analyst();

        let h1 = selection_input_hash(&profile, "revenue", &[a.clone(), b.clone()], 100);
        let h2 = selection_input_hash(&profile, "revenue", &[b.clone(), a.clone()], 100);
        let h3 = selection_input_hash(&profile, "churn", &[a, b], 100);
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }
}
