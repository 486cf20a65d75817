//! Account Models
//! Mission: Define user accounts, balances and roles

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account with escrow balance and match record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub balance_cents: i64,
    pub wins: i64,
    pub losses: i64,
    pub created_at: String,
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "USER")]
    User, // Create, join, finish, dispute
    #[serde(rename = "ADMIN")]
    Admin, // Resolve disputes, edit platform config
    #[serde(rename = "SUPER_ADMIN")]
    SuperAdmin, // Admin + role management
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Admin => "ADMIN",
            UserRole::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "USER" => Some(UserRole::User),
            "ADMIN" => Some(UserRole::Admin),
            "SUPER_ADMIN" => Some(UserRole::SuperAdmin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::SuperAdmin)
    }
}
