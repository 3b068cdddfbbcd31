//! Strata Core - Shared Types
//!
//! Data structures shared by every Strata crate: identifiers, roles, the
//! permission lattice, capability declarations, the request/response shape,
//! and the error taxonomy. This crate contains no scheduling or caching logic.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod capability;
pub mod enums;
pub mod error;
pub mod health;
pub mod permission;
pub mod request;

pub use capability::{Capability, ParamKind, ParameterSchema, ParameterSpec};
pub use enums::{CircuitState, Role, ResponseStyle, Tier};
pub use error::{
    CacheError, ConfigError, DispatchError, ErrorKind, StrataError, StrataResult, ValidationError,
};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use permission::{authorize, Permission};
pub use request::{ErrorInfo, Parameters, Request, RequestStatus, Response};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Request identifier using UUIDv7 for timestamp-sortable IDs.
pub type RequestId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 request id (timestamp-sortable).
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 of content, used for cache key components.
pub fn content_hash_hex(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_sortable() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a <= b);
    }

    #[test]
    fn test_content_hash_hex_stable() {
        let a = content_hash_hex(b"strata");
        let b = content_hash_hex(b"strata");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash_hex(b"strata2"));
    }
}
