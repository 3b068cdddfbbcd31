//! The interface agents implement to perform capabilities.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use strata_context::ContentItem;
use strata_core::{Capability, Parameters, RequestId, Role};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error returned by an executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("{message}")]
    Failed { message: String },

    /// The executor observed cancellation and stopped early.
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed {
            message: message.into(),
        }
    }
}

/// Per-invocation context handed to an executor.
///
/// Executors should watch [`cancelled`](Self::cancelled) and return promptly
/// once it fires; the deadline is enforced by cancelling this token.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: RequestId,
    pub caller_id: String,
    pub role: Role,
    pub intent: String,
    /// Content chosen by the context optimizer for this request.
    pub context_items: Arc<Vec<ContentItem>>,
    pub deadline: Instant,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        request_id: RequestId,
        caller_id: impl Into<String>,
        role: Role,
        intent: impl Into<String>,
        context_items: Arc<Vec<ContentItem>>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            caller_id: caller_id.into(),
            role,
            intent: intent.into(),
            context_items,
            deadline,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// An agent: a static list of capabilities plus the code that runs them.
///
/// Must be safe to call concurrently.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    fn agent_id(&self) -> &str;

    /// Capabilities this agent declares. Read once at registration.
    fn capabilities(&self) -> Vec<Capability>;

    async fn execute(
        &self,
        capability: &str,
        parameters: &Parameters,
        ctx: ExecutionContext,
    ) -> Result<Value, ExecutorError>;
}
