//! Request and response shapes handled by the orchestrator.

use crate::{new_request_id, DispatchError, ErrorKind, RequestId, Role, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Request parameters. Ordered so serialisation is canonical.
pub type Parameters = BTreeMap<String, Value>;

/// An analytics request submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub caller_id: String,
    pub role: Role,
    pub action: String,
    pub parameters: Parameters,
    pub submitted_at: Timestamp,
}

impl Request {
    /// Create a request with a fresh id, stamped now.
    pub fn new(caller_id: impl Into<String>, role: Role, action: impl Into<String>) -> Self {
        Self {
            id: new_request_id(),
            caller_id: caller_id.into(),
            role,
            action: action.into(),
            parameters: Parameters::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Free-text intent: the `intent` parameter if it is a string, else the action.
    pub fn intent(&self) -> &str {
        self.parameters
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or(&self.action)
    }
}

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Completed,
    Failed,
    Rejected,
    TimedOut,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::TimedOut => "timed_out",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Status a dispatch error resolves to.
    pub fn for_error(err: &DispatchError) -> Self {
        match err {
            DispatchError::UnknownAction { .. }
            | DispatchError::PermissionDenied { .. }
            | DispatchError::InvalidParameters { .. }
            | DispatchError::RateLimited { .. }
            | DispatchError::CircuitOpen { .. }
            | DispatchError::Overloaded { .. } => RequestStatus::Rejected,
            DispatchError::Execution { .. } => RequestStatus::Failed,
            DispatchError::TimedOut { .. } => RequestStatus::TimedOut,
            DispatchError::Cancelled { .. } => RequestStatus::Cancelled,
        }
    }
}

/// Error detail carried on a non-successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

impl From<&DispatchError> for ErrorInfo {
    fn from(err: &DispatchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            retry_after_ms: err.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

/// Response returned for every request. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub result: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub cache_hit: bool,
    pub execution_time_ms: u64,
}

impl Response {
    pub fn completed(request_id: RequestId, result: Value, cache_hit: bool, execution_time_ms: u64) -> Self {
        Self {
            request_id,
            status: RequestStatus::Completed,
            result: Some(result),
            error: None,
            cache_hit,
            execution_time_ms,
        }
    }

    pub fn from_error(request_id: RequestId, err: &DispatchError, execution_time_ms: u64) -> Self {
        Self {
            request_id,
            status: RequestStatus::for_error(err),
            result: None,
            error: Some(ErrorInfo::from(err)),
            cache_hit: false,
            execution_time_ms,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RequestStatus::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_falls_back_to_action() {
        let req = Request::new("c1", Role::Analyst, "forecast");
        assert_eq!(req.intent(), "forecast");

        let req = req.with_param("intent", json!("quarterly revenue trend"));
        assert_eq!(req.intent(), "quarterly revenue trend");
    }

    #[test]
    fn test_non_string_intent_ignored() {
        let req = Request::new("c1", Role::Analyst, "forecast").with_param("intent", json!(42));
        assert_eq!(req.intent(), "forecast");
    }

    #[test]
    fn test_status_for_error() {
        let rl = DispatchError::RateLimited {
            caller_id: "c".to_string(),
            retry_after_ms: 10,
        };
        assert_eq!(RequestStatus::for_error(&rl), RequestStatus::Rejected);
        let to = DispatchError::TimedOut {
            action: "a".to_string(),
            timeout_ms: 5,
        };
        assert_eq!(RequestStatus::for_error(&to), RequestStatus::TimedOut);
    }

    #[test]
    fn test_error_response_carries_retry_hint() {
        let id = new_request_id();
        let err = DispatchError::CircuitOpen {
            agent_id: "forecast-agent".to_string(),
            retry_after_ms: 900,
        };
        let resp = Response::from_error(id, &err, 0);
        assert_eq!(resp.status, RequestStatus::Rejected);
        assert!(resp.result.is_none());
        let info = resp.error.unwrap();
        assert_eq!(info.kind, ErrorKind::CircuitOpen);
        assert!(info.retryable);
        assert_eq!(info.retry_after_ms, Some(900));
    }

    #[test]
    fn test_response_serializes() {
        let resp = Response::completed(new_request_id(), json!({"value": 1}), true, 0);
        let s = serde_json::to_string(&resp).unwrap();
        assert!(s.contains("\"Completed\""));
        assert!(s.contains("\"cache_hit\":true"));
    }
}
