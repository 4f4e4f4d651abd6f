//! Caller identity.
//!
//! Authentication happens upstream; the sync server only consumes the
//! resulting tenant, user and role.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The caller's role within its tenant.
///
/// Roles are listed from widest to narrowest visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees every row, soft-deleted ones included.
    Administrator,
    /// Staff operating the tenant's day-to-day work.
    Operator,
    /// Manages a subset of accounts.
    Manager,
    /// End customer.
    Customer,
}

impl Role {
    /// All roles, widest first.
    pub const ALL: [Role; 4] = [
        Role::Administrator,
        Role::Operator,
        Role::Manager,
        Role::Customer,
    ];

    /// The wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Operator => "operator",
            Role::Manager => "manager",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Ok(Role::Administrator),
            "operator" => Ok(Role::Operator),
            "manager" => Ok(Role::Manager),
            "customer" => Ok(Role::Customer),
            other => Err(SyncError::Unauthenticated(format!("unknown role: {other}"))),
        }
    }
}

/// Who is calling, on behalf of which tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    /// Tenant the request is scoped to.
    pub tenant_id: String,
    /// Acting user.
    pub user_id: String,
    /// Acting user's role.
    pub role: Role,
}

impl AuthContext {
    /// Creates an auth context.
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            role,
        }
    }

    /// Checks that the identity is usable.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.tenant_id.is_empty() {
            return Err(SyncError::Unauthenticated("missing tenant".into()));
        }
        if self.user_id.is_empty() {
            return Err(SyncError::Unauthenticated("missing user".into()));
        }
        Ok(())
    }
}
