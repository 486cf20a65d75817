//! Accounts & Access Module
//! Mission: User registry, roles and the admin gates in front of privileged operations

pub mod access;
pub mod models;
pub mod user_store;

pub use access::{require_admin, require_super_admin};
pub use user_store::UserStore;
