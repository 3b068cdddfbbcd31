//! Permission lattice gating every capability invocation.
//!
//! ```text
//! ReadOnly < ReadExecute < ReadExecuteWrite < Admin
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller or capability permission level. Ordering is the lattice order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    ReadExecute,
    ReadExecuteWrite,
    Admin,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::ReadOnly,
        Permission::ReadExecute,
        Permission::ReadExecuteWrite,
        Permission::Admin,
    ];

    /// Whether a caller holding `self` may invoke something requiring `required`.
    pub fn allows(self, required: Permission) -> bool {
        authorize(self, required)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::ReadOnly => "read_only",
            Permission::ReadExecute => "read_execute",
            Permission::ReadExecuteWrite => "read_execute_write",
            Permission::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// Pure total-order check: `caller >= required`.
pub fn authorize(caller: Permission, required: Permission) -> bool {
    caller >= required
}
