//! Health reporting for orchestrator components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health status of a single component.
///
/// Ordered from best to worst so that the overall status of a report is the
/// maximum of its checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of checking one component (a breaker, the pool, the cache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, component, None)
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, component, Some(message.into()))
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, component, Some(message.into()))
    }

    fn with_status(status: HealthStatus, component: impl Into<String>, message: Option<String>) -> Self {
        Self {
            status,
            component: component.into(),
            message,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Aggregate of component checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Build a report whose status is the worst of its checks.
    /// An empty report is healthy.
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self { status, checks }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_takes_worst_status() {
        let report = HealthReport::from_checks(vec![
            HealthCheck::healthy("pool"),
            HealthCheck::degraded("breaker:forecast-agent", "half-open trial pending"),
            HealthCheck::healthy("cache"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.is_healthy());
        assert!(report.check("cache").is_some());
    }

    #[test]
    fn test_empty_report_is_healthy() {
        assert!(HealthReport::from_checks(Vec::new()).is_healthy());
    }

    #[test]
    fn test_metadata_builder() {
        let check = HealthCheck::unhealthy("breaker:a", "open")
            .with_metadata("consecutive_opens", serde_json::json!(3));
        assert_eq!(check.metadata.get("consecutive_opens"), Some(&serde_json::json!(3)));
        assert_eq!(check.message.as_deref(), Some("open"));
    }
}
