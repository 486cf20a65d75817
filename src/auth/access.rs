//! Access Control
//! Mission: Gate admin-only operations on the caller's role

use crate::auth::models::{User, UserRole};
use crate::error::{EngineError, EngineResult};

/// ADMIN or SUPER_ADMIN
pub fn require_admin(user: &User) -> EngineResult<()> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            reason: "admin role required",
        })
    }
}

pub fn require_super_admin(user: &User) -> EngineResult<()> {
    if user.role == UserRole::SuperAdmin {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            reason: "super admin role required",
        })
    }
}
