//! Enum types shared across crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ROLE
// ============================================================================

/// Caller role. Each role maps to a profile with a token budget and
/// content priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Analyst,
    DataScientist,
    Production,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 3] = [Role::Analyst, Role::DataScientist, Role::Production];

    /// Stable string form, used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Analyst => "analyst",
            Role::DataScientist => "data_scientist",
            Role::Production => "production",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "analyst" => Ok(Role::Analyst),
            "data_scientist" | "datascientist" => Ok(Role::DataScientist),
            "production" => Ok(Role::Production),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParseError(pub String);

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid role: {}", self.0)
    }
}

impl std::error::Error for RoleParseError {}

// ============================================================================
// RESPONSE STYLE
// ============================================================================

/// How a role prefers responses to be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseStyle {
    /// Short, summary-first answers
    Concise,
    /// Full detail including methodology
    Detailed,
    /// Machine-consumable output
    Structured,
}

// ============================================================================
// CACHE TIER
// ============================================================================

/// Storage level of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Uncompressed, fastest
    Hot,
    /// Stored compressed, decompressed on read
    Compressed,
    /// Filled speculatively by the preloader
    Predictive,
}

impl Tier {
    /// Lookup order for `get`.
    pub const LOOKUP_ORDER: [Tier; 3] = [Tier::Hot, Tier::Compressed, Tier::Predictive];

    /// Dense index for per-tier arrays.
    pub fn index(&self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Compressed => 1,
            Tier::Predictive => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Compressed => "compressed",
            Tier::Predictive => "predictive",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, one trial request is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "Closed",
            Self::Open => "Open",
            Self::HalfOpen => "HalfOpen",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip_from_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert_eq!("DataScientist".parse::<Role>(), Ok(Role::DataScientist));
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn test_tier_indices_are_dense() {
        let indices: Vec<usize> = Tier::LOOKUP_ORDER.iter().map(|t| t.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_circuit_state_from_u8() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        assert_eq!(CircuitState::from(9), CircuitState::HalfOpen);
    }
}
