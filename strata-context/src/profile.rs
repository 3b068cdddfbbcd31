//! Role profiles: per-role token budget, content priorities and permission.

use serde::{Deserialize, Serialize};
use strata_core::{Permission, ResponseStyle, Role};

/// Static description of how a role is served. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub role: Role,
    /// Share of the maximum context budget this role may use (0..=1).
    pub token_budget_fraction: f64,
    /// Content tags in descending order of importance.
    pub content_priorities: Vec<String>,
    pub response_style: ResponseStyle,
    /// Permission granted to callers acting in this role.
    pub permission: Permission,
    /// Base cache priority for results computed for this role.
    pub cache_priority: u32,
}

impl RoleProfile {
    /// Default profile for `role`.
    pub fn default_for(role: Role) -> Self {
        let tags = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        match role {
            Role::Analyst => Self {
                role,
                token_budget_fraction: 0.5,
                content_priorities: tags(&["summary", "trend", "chart", "explanation"]),
                response_style: ResponseStyle::Concise,
                permission: Permission::ReadExecute,
                cache_priority: 1,
            },
            Role::DataScientist => Self {
                role,
                token_budget_fraction: 0.75,
                content_priorities: tags(&["methodology", "model", "statistics", "dataset", "summary"]),
                response_style: ResponseStyle::Detailed,
                permission: Permission::ReadExecuteWrite,
                cache_priority: 2,
            },
            Role::Production => Self {
                role,
                token_budget_fraction: 0.3,
                content_priorities: tags(&["schema", "status", "metric", "summary"]),
                response_style: ResponseStyle::Structured,
                permission: Permission::Admin,
                cache_priority: 3,
            },
        }
    }

    /// Token budget out of `max_tokens`, rounded down.
    pub fn token_budget(&self, max_tokens: u32) -> u32 {
        let fraction = self.token_budget_fraction.clamp(0.0, 1.0);
        (f64::from(max_tokens) * fraction).floor() as u32
    }

    /// Position of `tag` in the priority list, if present.
    pub fn priority_of(&self, tag: &str) -> Option<usize> {
        self.content_priorities
            .iter()
            .position(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// One profile per role. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleProfiles {
    profiles: [RoleProfile; 3],
}

impl Default for RoleProfiles {
    fn default() -> Self {
        Self {
            profiles: Role::ALL.map(RoleProfile::default_for),
        }
    }
}

fn slot(role: Role) -> usize {
    match role {
        Role::Analyst => 0,
        Role::DataScientist => 1,
        Role::Production => 2,
    }
}

impl RoleProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the profile for `profile.role`.
    pub fn with_profile(mut self, profile: RoleProfile) -> Self {
        let idx = slot(profile.role);
        self.profiles[idx] = profile;
        self
    }

    pub fn get(&self, role: Role) -> &RoleProfile {
        &self.profiles[slot(role)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleProfile> {
        self.profiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles() {
        let profiles = RoleProfiles::default();
        assert_eq!(profiles.get(Role::Analyst).permission, Permission::ReadExecute);
        assert_eq!(profiles.get(Role::DataScientist).cache_priority, 2);
        assert_eq!(profiles.get(Role::Production).permission, Permission::Admin);
        assert!(profiles.iter().all(|p| (0.0..=1.0).contains(&p.token_budget_fraction)));
    }

    #[test]
    fn test_token_budget_rounds_down() {
        let analyst = RoleProfile::default_for(Role::Analyst);
        assert_eq!(analyst.token_budget(4001), 2000);
        let production = RoleProfile::default_for(Role::Production);
        assert_eq!(production.token_budget(1000), 300);
    }

    #[test]
    fn test_override_profile() {
        let custom = RoleProfile {
            token_budget_fraction: 0.9,
            ..RoleProfile::default_for(Role::Analyst)
        };
        let profiles = RoleProfiles::new().with_profile(custom);
        assert_eq!(profiles.get(Role::Analyst).token_budget(100), 90);
        assert_eq!(profiles.get(Role::Production).token_budget(100), 30);
    }

    #[test]
    fn test_priority_lookup_is_case_insensitive() {
        let analyst = RoleProfile::default_for(Role::Analyst);
        assert_eq!(analyst.priority_of("Trend"), Some(1));
        assert_eq!(analyst.priority_of("unknown"), None);
    }
}
