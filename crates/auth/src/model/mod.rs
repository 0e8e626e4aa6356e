//! Persisted records of the authority.

mod permission;
mod role;
mod system;
mod user;

pub use permission::{AccessLevel, NewPermission, Permission, PermissionSet, PermissionStats, RolePermission};
pub use role::{NewRole, Role, RoleUpdate};
pub use system::{DEFAULT_RATE_LIMIT, IssuedCredentials, NewSystem, System, SystemIdentity, SystemStats, SystemUpdate};
pub(crate) use user::normalize_email;
pub use user::{LoginDecision, LoginDenial, NewUser, User, UserRoleAssignment, UserSearchCriteria, UserUpdate};
