//! Persistence contract for the authority.
//!
//! Each method is one atomic unit: unique constraints, the status
//! compare-and-swap and delete-with-reparent are the store's responsibility,
//! so components never need a read-modify-write across calls to stay
//! consistent. Updates name the fields they change; no method writes back a
//! whole row read earlier, so concurrent writers to disjoint fields of the
//! same row never undo each other.

mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use uniauth_core::{DomainResult, PermissionId, RoleId, SystemId, UserId};

use crate::lifecycle::Transition;
use crate::model::{
    Permission, Role, RolePermission, RoleUpdate, System, SystemUpdate, User, UserRoleAssignment, UserUpdate,
};

pub use in_memory::InMemoryAuthorityStore;

pub trait AuthorityStore: Send + Sync {
    // Systems

    /// `Conflict` on duplicate code or api key.
    fn insert_system(&self, system: System) -> DomainResult<()>;

    fn system(&self, id: SystemId) -> DomainResult<Option<System>>;

    fn system_by_code(&self, code: &str) -> DomainResult<Option<System>>;

    fn system_by_api_key(&self, api_key: &str) -> DomainResult<Option<System>>;

    /// Applies the administrative fields of `update`; key material is never
    /// touched. Returns the row before and after. `InvariantViolation` when
    /// deactivating a system whose roles are still held.
    fn update_system(&self, id: SystemId, update: &SystemUpdate, now: DateTime<Utc>) -> DomainResult<(System, System)>;

    /// Installs a new key pair and nothing else. `Conflict` if `api_key`
    /// belongs to another system.
    fn replace_system_keys(
        &self,
        id: SystemId,
        api_key: String,
        secret_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<System>;

    /// Sets `keys_expire_at` to `at`.
    fn expire_system_keys(&self, id: SystemId, at: DateTime<Utc>) -> DomainResult<System>;

    /// `InvariantViolation` while the system still owns roles or permissions.
    fn delete_system(&self, id: SystemId) -> DomainResult<System>;

    fn systems(&self) -> DomainResult<Vec<System>>;

    // Permissions

    /// All-or-nothing: `Conflict` if any code is taken (or repeated in the batch).
    fn insert_permissions(&self, permissions: Vec<Permission>) -> DomainResult<()>;

    fn permission(&self, id: PermissionId) -> DomainResult<Option<Permission>>;

    fn permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>>;

    fn permissions_for_system(&self, system_id: SystemId) -> DomainResult<Vec<Permission>>;

    /// `NotFound` if absent; `Conflict` while any role grants it.
    fn delete_permission(&self, id: PermissionId) -> DomainResult<Permission>;

    // Roles

    /// `Conflict` on duplicate code.
    fn insert_role(&self, role: Role) -> DomainResult<()>;

    fn role(&self, id: RoleId) -> DomainResult<Option<Role>>;

    fn role_by_code(&self, code: &str) -> DomainResult<Option<Role>>;

    /// `None` lists global roles.
    fn roles_for_system(&self, system_id: Option<SystemId>) -> DomainResult<Vec<Role>>;

    fn children_of(&self, id: RoleId) -> DomainResult<Vec<Role>>;

    /// Applies `update`; `parent_id`, `code` and `system_id` are never touched.
    fn update_role(&self, id: RoleId, update: &RoleUpdate) -> DomainResult<Role>;

    /// Writes `parent_id` only. `NotFound` for a missing parent,
    /// `ScopeMismatch` across tenants, `CycleDetected` if `id` would become
    /// its own ancestor.
    fn set_role_parent(&self, id: RoleId, parent: Option<RoleId>) -> DomainResult<Role>;

    /// Removes the role and its grants and moves its children to its parent.
    /// `Conflict` while a user holds the role, `InvariantViolation` for a
    /// system role. Returns the moved children.
    fn delete_role_reparenting(&self, id: RoleId) -> DomainResult<(Role, Vec<RoleId>)>;

    // Role grants

    /// `Conflict` if the (role, permission) pair exists.
    fn insert_grant(&self, grant: RolePermission) -> DomainResult<()>;

    fn delete_grant(&self, role_id: RoleId, permission_id: PermissionId) -> DomainResult<bool>;

    fn grants_for_role(&self, role_id: RoleId) -> DomainResult<Vec<RolePermission>>;

    fn grants_for_permission(&self, permission_id: PermissionId) -> DomainResult<Vec<RolePermission>>;

    // Users

    /// `Conflict` on duplicate username or email.
    fn insert_user(&self, user: User) -> DomainResult<()>;

    fn user(&self, id: UserId) -> DomainResult<Option<User>>;

    fn user_by_username(&self, username: &str) -> DomainResult<Option<User>>;

    /// `email` must already be normalized.
    fn user_by_email(&self, email: &str) -> DomainResult<Option<User>>;

    fn users(&self) -> DomainResult<Vec<User>>;

    /// Applies the profile fields of `update`. `Conflict` if the new email
    /// belongs to another user.
    fn update_user_profile(&self, id: UserId, update: &UserUpdate, now: DateTime<Utc>) -> DomainResult<User>;

    /// Adds one to `failed_login_attempts` and returns the new row.
    fn increment_failed_logins(&self, id: UserId) -> DomainResult<User>;

    /// Zeroes `failed_login_attempts` and stamps `last_login_at`.
    fn record_successful_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<User>;

    /// Applies `transition` if and only if the stored status still equals
    /// `transition.from`; `Conflict` otherwise. Only status and the
    /// transition's effects are written.
    fn apply_transition(
        &self,
        id: UserId,
        transition: &Transition,
        locked_until: Option<DateTime<Utc>>,
    ) -> DomainResult<User>;

    /// Removes the user together with every assignment it holds.
    fn delete_user(&self, id: UserId) -> DomainResult<(User, Vec<UserRoleAssignment>)>;

    // Assignments

    /// `Conflict` if the (user, role) pair exists.
    fn insert_assignment(&self, assignment: UserRoleAssignment) -> DomainResult<()>;

    fn delete_assignment(&self, user_id: UserId, role_id: RoleId) -> DomainResult<bool>;

    fn assignments_for_user(&self, user_id: UserId) -> DomainResult<Vec<UserRoleAssignment>>;

    fn assignments_for_role(&self, role_id: RoleId) -> DomainResult<Vec<UserRoleAssignment>>;

    /// Removes and returns every assignment with `expires_at < now`.
    fn delete_expired_assignments(&self, now: DateTime<Utc>) -> DomainResult<Vec<UserRoleAssignment>>;
}

impl<S> AuthorityStore for Arc<S>
where
    S: AuthorityStore + ?Sized,
{
    fn insert_system(&self, system: System) -> DomainResult<()> {
        (**self).insert_system(system)
    }

    fn system(&self, id: SystemId) -> DomainResult<Option<System>> {
        (**self).system(id)
    }

    fn system_by_code(&self, code: &str) -> DomainResult<Option<System>> {
        (**self).system_by_code(code)
    }

    fn system_by_api_key(&self, api_key: &str) -> DomainResult<Option<System>> {
        (**self).system_by_api_key(api_key)
    }

    fn update_system(&self, id: SystemId, update: &SystemUpdate, now: DateTime<Utc>) -> DomainResult<(System, System)> {
        (**self).update_system(id, update, now)
    }

    fn replace_system_keys(
        &self,
        id: SystemId,
        api_key: String,
        secret_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<System> {
        (**self).replace_system_keys(id, api_key, secret_hash, issued_at, expires_at)
    }

    fn expire_system_keys(&self, id: SystemId, at: DateTime<Utc>) -> DomainResult<System> {
        (**self).expire_system_keys(id, at)
    }

    fn delete_system(&self, id: SystemId) -> DomainResult<System> {
        (**self).delete_system(id)
    }

    fn systems(&self) -> DomainResult<Vec<System>> {
        (**self).systems()
    }

    fn insert_permissions(&self, permissions: Vec<Permission>) -> DomainResult<()> {
        (**self).insert_permissions(permissions)
    }

    fn permission(&self, id: PermissionId) -> DomainResult<Option<Permission>> {
        (**self).permission(id)
    }

    fn permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>> {
        (**self).permission_by_code(code)
    }

    fn permissions_for_system(&self, system_id: SystemId) -> DomainResult<Vec<Permission>> {
        (**self).permissions_for_system(system_id)
    }

    fn delete_permission(&self, id: PermissionId) -> DomainResult<Permission> {
        (**self).delete_permission(id)
    }

    fn insert_role(&self, role: Role) -> DomainResult<()> {
        (**self).insert_role(role)
    }

    fn role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        (**self).role(id)
    }

    fn role_by_code(&self, code: &str) -> DomainResult<Option<Role>> {
        (**self).role_by_code(code)
    }

    fn roles_for_system(&self, system_id: Option<SystemId>) -> DomainResult<Vec<Role>> {
        (**self).roles_for_system(system_id)
    }

    fn children_of(&self, id: RoleId) -> DomainResult<Vec<Role>> {
        (**self).children_of(id)
    }

    fn update_role(&self, id: RoleId, update: &RoleUpdate) -> DomainResult<Role> {
        (**self).update_role(id, update)
    }

    fn set_role_parent(&self, id: RoleId, parent: Option<RoleId>) -> DomainResult<Role> {
        (**self).set_role_parent(id, parent)
    }

    fn delete_role_reparenting(&self, id: RoleId) -> DomainResult<(Role, Vec<RoleId>)> {
        (**self).delete_role_reparenting(id)
    }

    fn insert_grant(&self, grant: RolePermission) -> DomainResult<()> {
        (**self).insert_grant(grant)
    }

    fn delete_grant(&self, role_id: RoleId, permission_id: PermissionId) -> DomainResult<bool> {
        (**self).delete_grant(role_id, permission_id)
    }

    fn grants_for_role(&self, role_id: RoleId) -> DomainResult<Vec<RolePermission>> {
        (**self).grants_for_role(role_id)
    }

    fn grants_for_permission(&self, permission_id: PermissionId) -> DomainResult<Vec<RolePermission>> {
        (**self).grants_for_permission(permission_id)
    }

    fn insert_user(&self, user: User) -> DomainResult<()> {
        (**self).insert_user(user)
    }

    fn user(&self, id: UserId) -> DomainResult<Option<User>> {
        (**self).user(id)
    }

    fn user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        (**self).user_by_username(username)
    }

    fn user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        (**self).user_by_email(email)
    }

    fn users(&self) -> DomainResult<Vec<User>> {
        (**self).users()
    }

    fn update_user_profile(&self, id: UserId, update: &UserUpdate, now: DateTime<Utc>) -> DomainResult<User> {
        (**self).update_user_profile(id, update, now)
    }

    fn increment_failed_logins(&self, id: UserId) -> DomainResult<User> {
        (**self).increment_failed_logins(id)
    }

    fn record_successful_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<User> {
        (**self).record_successful_login(id, at)
    }

    fn apply_transition(
        &self,
        id: UserId,
        transition: &Transition,
        locked_until: Option<DateTime<Utc>>,
    ) -> DomainResult<User> {
        (**self).apply_transition(id, transition, locked_until)
    }

    fn delete_user(&self, id: UserId) -> DomainResult<(User, Vec<UserRoleAssignment>)> {
        (**self).delete_user(id)
    }

    fn insert_assignment(&self, assignment: UserRoleAssignment) -> DomainResult<()> {
        (**self).insert_assignment(assignment)
    }

    fn delete_assignment(&self, user_id: UserId, role_id: RoleId) -> DomainResult<bool> {
        (**self).delete_assignment(user_id, role_id)
    }

    fn assignments_for_user(&self, user_id: UserId) -> DomainResult<Vec<UserRoleAssignment>> {
        (**self).assignments_for_user(user_id)
    }

    fn assignments_for_role(&self, role_id: RoleId) -> DomainResult<Vec<UserRoleAssignment>> {
        (**self).assignments_for_role(role_id)
    }

    fn delete_expired_assignments(&self, now: DateTime<Utc>) -> DomainResult<Vec<UserRoleAssignment>> {
        (**self).delete_expired_assignments(now)
    }
}
