//! Roles, permissions and the session handed over by FranceConnect/ProConnect.
//!
//! Authentication itself happens upstream; this module only interprets the
//! resulting identity and answers allow/deny questions about it.

pub mod roles;
pub mod session;

pub use roles::{has_permission, has_permission_code, permissions_for, Permission, UserRole};
pub use session::{
    check_role_access, AccessCheckResult, AccessError, AuthMethod, AuthUser, Session, UserId,
};
