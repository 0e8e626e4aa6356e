use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use uniauth_core::{DomainError, DomainResult, Entity, PermissionId, RoleId, SystemId, UserId};

use super::AuthorityStore;
use crate::lifecycle::Transition;
use crate::model::{
    Permission, Role, RolePermission, RoleUpdate, System, SystemUpdate, User, UserRoleAssignment, UserUpdate,
};

/// Rows of one entity keyed by id.
#[derive(Debug)]
struct EntityTable<E: Entity> {
    rows: BTreeMap<E::Id, E>,
}

impl<E: Entity + Clone> EntityTable<E> {
    fn get(&self, id: E::Id) -> Option<E> {
        self.rows.get(&id).cloned()
    }

    fn find(&self, pred: impl Fn(&E) -> bool) -> Option<E> {
        self.rows.values().find(|e| pred(e)).cloned()
    }

    fn filter(&self, pred: impl Fn(&E) -> bool) -> Vec<E> {
        self.rows.values().filter(|e| pred(e)).cloned().collect()
    }

    fn any(&self, pred: impl Fn(&E) -> bool) -> bool {
        self.rows.values().any(pred)
    }

    fn all(&self) -> Vec<E> {
        self.rows.values().cloned().collect()
    }

    fn put(&mut self, entity: E) {
        self.rows.insert(entity.id(), entity);
    }

    /// In-place access to one row; `what` names it in the `NotFound` message.
    fn get_mut(&mut self, id: E::Id, what: &str) -> DomainResult<&mut E> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("{what} {id}")))
    }
}

impl<E: Entity> Default for EntityTable<E> {
    fn default() -> Self {
        Self { rows: BTreeMap::new() }
    }
}

#[derive(Debug, Default)]
struct Tables {
    systems: EntityTable<System>,
    permissions: EntityTable<Permission>,
    roles: EntityTable<Role>,
    users: EntityTable<User>,
    grants: BTreeMap<(RoleId, PermissionId), RolePermission>,
    assignments: BTreeMap<(UserId, RoleId), UserRoleAssignment>,
}

/// In-memory authority store.
///
/// Intended for tests/dev. One lock over all tables, so every trait method
/// is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryAuthorityStore {
    tables: RwLock<Tables>,
}

impl InMemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::invariant("store lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::invariant("store lock poisoned"))
    }
}

impl AuthorityStore for InMemoryAuthorityStore {
    fn insert_system(&self, system: System) -> DomainResult<()> {
        let mut t = self.write()?;
        if t.systems.any(|s| s.code == system.code) {
            return Err(DomainError::conflict(format!("system code '{}' already exists", system.code)));
        }
        if t.systems.any(|s| s.api_key == system.api_key) {
            return Err(DomainError::conflict("api key already issued"));
        }
        t.systems.put(system);
        Ok(())
    }

    fn system(&self, id: SystemId) -> DomainResult<Option<System>> {
        Ok(self.read()?.systems.get(id))
    }

    fn system_by_code(&self, code: &str) -> DomainResult<Option<System>> {
        Ok(self.read()?.systems.find(|s| s.code == code))
    }

    fn system_by_api_key(&self, api_key: &str) -> DomainResult<Option<System>> {
        Ok(self.read()?.systems.find(|s| s.api_key == api_key))
    }

    fn update_system(&self, id: SystemId, update: &SystemUpdate, now: DateTime<Utc>) -> DomainResult<(System, System)> {
        let mut t = self.write()?;
        let previous = t.systems.get_mut(id, "system")?.clone();
        let mut next = previous.clone();
        update.apply_to(&mut next)?;

        if previous.is_active && !next.is_active {
            let roles: BTreeSet<RoleId> = t.roles.filter(|r| r.system_id == Some(id)).iter().map(|r| r.id).collect();
            let holders = t.assignments.keys().filter(|(_, r)| roles.contains(r)).count();
            if holders > 0 {
                return Err(DomainError::invariant(format!(
                    "system '{}' has {holders} active role holder(s)",
                    previous.code
                )));
            }
        }

        let row = t.systems.get_mut(id, "system")?;
        row.name = next.name;
        row.description = next.description;
        row.base_url = next.base_url;
        row.rate_limit = next.rate_limit;
        row.is_active = next.is_active;
        row.updated_at = now;
        Ok((previous, row.clone()))
    }

    fn replace_system_keys(
        &self,
        id: SystemId,
        api_key: String,
        secret_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<System> {
        let mut t = self.write()?;
        if t.systems.any(|s| s.id != id && s.api_key == api_key) {
            return Err(DomainError::conflict("api key already issued"));
        }
        let row = t.systems.get_mut(id, "system")?;
        row.api_key = api_key;
        row.secret_hash = secret_hash;
        row.keys_issued_at = issued_at;
        row.keys_expire_at = expires_at;
        row.updated_at = issued_at;
        Ok(row.clone())
    }

    fn expire_system_keys(&self, id: SystemId, at: DateTime<Utc>) -> DomainResult<System> {
        let mut t = self.write()?;
        let row = t.systems.get_mut(id, "system")?;
        row.keys_expire_at = at;
        row.updated_at = at;
        Ok(row.clone())
    }

    fn delete_system(&self, id: SystemId) -> DomainResult<System> {
        let mut t = self.write()?;
        let Some(system) = t.systems.get(id) else {
            return Err(DomainError::not_found(format!("system {id}")));
        };
        let roles = t.roles.filter(|r| r.system_id == Some(id)).len();
        let permissions = t.permissions.filter(|p| p.system_id == id).len();
        if roles > 0 || permissions > 0 {
            return Err(DomainError::invariant(format!(
                "system '{}' still owns {roles} role(s) and {permissions} permission(s)",
                system.code
            )));
        }
        t.systems.rows.remove(&id);
        Ok(system)
    }

    fn systems(&self) -> DomainResult<Vec<System>> {
        Ok(self.read()?.systems.all())
    }

    fn insert_permissions(&self, permissions: Vec<Permission>) -> DomainResult<()> {
        let mut t = self.write()?;
        let mut batch = BTreeSet::new();
        for p in &permissions {
            if !batch.insert(p.code.as_str()) || t.permissions.any(|e| e.code == p.code) {
                return Err(DomainError::conflict(format!("permission code '{}' already exists", p.code)));
            }
        }
        for p in permissions {
            t.permissions.put(p);
        }
        Ok(())
    }

    fn permission(&self, id: PermissionId) -> DomainResult<Option<Permission>> {
        Ok(self.read()?.permissions.get(id))
    }

    fn permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>> {
        Ok(self.read()?.permissions.find(|p| p.code == code))
    }

    fn permissions_for_system(&self, system_id: SystemId) -> DomainResult<Vec<Permission>> {
        Ok(self.read()?.permissions.filter(|p| p.system_id == system_id))
    }

    fn delete_permission(&self, id: PermissionId) -> DomainResult<Permission> {
        let mut t = self.write()?;
        let Some(permission) = t.permissions.get(id) else {
            return Err(DomainError::not_found(format!("permission {id}")));
        };
        let granted = t.grants.keys().filter(|(_, p)| *p == id).count();
        if granted > 0 {
            return Err(DomainError::conflict(format!(
                "permission '{}' is granted to {granted} role(s)",
                permission.code
            )));
        }
        t.permissions.rows.remove(&id);
        Ok(permission)
    }

    fn insert_role(&self, role: Role) -> DomainResult<()> {
        let mut t = self.write()?;
        if t.roles.any(|r| r.code == role.code) {
            return Err(DomainError::conflict(format!("role code '{}' already exists", role.code)));
        }
        t.roles.put(role);
        Ok(())
    }

    fn role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        Ok(self.read()?.roles.get(id))
    }

    fn role_by_code(&self, code: &str) -> DomainResult<Option<Role>> {
        Ok(self.read()?.roles.find(|r| r.code == code))
    }

    fn roles_for_system(&self, system_id: Option<SystemId>) -> DomainResult<Vec<Role>> {
        Ok(self.read()?.roles.filter(|r| r.system_id == system_id))
    }

    fn children_of(&self, id: RoleId) -> DomainResult<Vec<Role>> {
        Ok(self.read()?.roles.filter(|r| r.parent_id == Some(id)))
    }

    fn update_role(&self, id: RoleId, update: &RoleUpdate) -> DomainResult<Role> {
        let mut t = self.write()?;
        let row = t.roles.get_mut(id, "role")?;
        let mut next = row.clone();
        update.apply_to(&mut next)?;

        row.name = next.name;
        row.description = next.description;
        row.is_default = next.is_default;
        row.is_system_role = next.is_system_role;
        row.priority = next.priority;
        Ok(row.clone())
    }

    fn set_role_parent(&self, id: RoleId, parent: Option<RoleId>) -> DomainResult<Role> {
        let mut t = self.write()?;
        let role = t.roles.get_mut(id, "role")?.clone();
        if let Some(parent_id) = parent {
            let parent = t.roles.get_mut(parent_id, "parent role")?.clone();
            if parent.system_id != role.system_id {
                return Err(DomainError::scope_mismatch(format!(
                    "role '{}' and parent '{}' belong to different tenants",
                    role.code, parent.code
                )));
            }
            let mut visited = BTreeSet::new();
            let mut cursor = Some(parent_id);
            while let Some(current) = cursor {
                if current == id {
                    return Err(DomainError::cycle(format!(
                        "'{}' is a descendant of '{}'",
                        parent.code, role.code
                    )));
                }
                if !visited.insert(current) {
                    return Err(DomainError::cycle(format!(
                        "existing hierarchy above role {current} is cyclic"
                    )));
                }
                cursor = t.roles.rows.get(&current).and_then(|r| r.parent_id);
            }
        }

        let row = t.roles.get_mut(id, "role")?;
        row.parent_id = parent;
        Ok(row.clone())
    }

    fn delete_role_reparenting(&self, id: RoleId) -> DomainResult<(Role, Vec<RoleId>)> {
        let mut t = self.write()?;
        let Some(role) = t.roles.get(id) else {
            return Err(DomainError::not_found(format!("role {id}")));
        };
        if role.is_system_role {
            return Err(DomainError::invariant(format!("system role '{}' cannot be deleted", role.code)));
        }
        let holders = t.assignments.keys().filter(|(_, r)| *r == id).count();
        if holders > 0 {
            return Err(DomainError::conflict(format!(
                "role '{}' is assigned to {holders} user(s)",
                role.code
            )));
        }

        let mut moved = Vec::new();
        for child in t.roles.rows.values_mut().filter(|r| r.parent_id == Some(id)) {
            child.parent_id = role.parent_id;
            moved.push(child.id);
        }
        t.grants.retain(|(r, _), _| *r != id);
        t.roles.rows.remove(&id);
        Ok((role, moved))
    }

    fn insert_grant(&self, grant: RolePermission) -> DomainResult<()> {
        let mut t = self.write()?;
        let key = (grant.role_id, grant.permission_id);
        if t.grants.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "permission {} is already assigned to role {}",
                grant.permission_id, grant.role_id
            )));
        }
        t.grants.insert(key, grant);
        Ok(())
    }

    fn delete_grant(&self, role_id: RoleId, permission_id: PermissionId) -> DomainResult<bool> {
        Ok(self.write()?.grants.remove(&(role_id, permission_id)).is_some())
    }

    fn grants_for_role(&self, role_id: RoleId) -> DomainResult<Vec<RolePermission>> {
        let t = self.read()?;
        Ok(t.grants
            .iter()
            .filter(|((r, _), _)| *r == role_id)
            .map(|(_, g)| g.clone())
            .collect())
    }

    fn grants_for_permission(&self, permission_id: PermissionId) -> DomainResult<Vec<RolePermission>> {
        let t = self.read()?;
        Ok(t.grants
            .values()
            .filter(|g| g.permission_id == permission_id)
            .cloned()
            .collect())
    }

    fn insert_user(&self, user: User) -> DomainResult<()> {
        let mut t = self.write()?;
        if t.users.any(|u| u.username == user.username) {
            return Err(DomainError::conflict(format!("username '{}' is taken", user.username)));
        }
        if t.users.any(|u| u.email == user.email) {
            return Err(DomainError::conflict(format!("email '{}' is taken", user.email)));
        }
        t.users.put(user);
        Ok(())
    }

    fn user(&self, id: UserId) -> DomainResult<Option<User>> {
        Ok(self.read()?.users.get(id))
    }

    fn user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        Ok(self.read()?.users.find(|u| u.username == username))
    }

    fn user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        Ok(self.read()?.users.find(|u| u.email == email))
    }

    fn users(&self) -> DomainResult<Vec<User>> {
        Ok(self.read()?.users.all())
    }

    fn update_user_profile(&self, id: UserId, update: &UserUpdate, now: DateTime<Utc>) -> DomainResult<User> {
        let mut t = self.write()?;
        let mut next = t.users.get_mut(id, "user")?.clone();
        update.apply_to(&mut next, now)?;
        if t.users.any(|u| u.id != id && u.email == next.email) {
            return Err(DomainError::conflict(format!("email '{}' is taken", next.email)));
        }

        let row = t.users.get_mut(id, "user")?;
        row.email = next.email;
        row.full_name = next.full_name;
        row.phone = next.phone;
        row.avatar_url = next.avatar_url;
        row.updated_at = next.updated_at;
        Ok(row.clone())
    }

    fn increment_failed_logins(&self, id: UserId) -> DomainResult<User> {
        let mut t = self.write()?;
        let row = t.users.get_mut(id, "user")?;
        row.failed_login_attempts = row.failed_login_attempts.saturating_add(1);
        Ok(row.clone())
    }

    fn record_successful_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<User> {
        let mut t = self.write()?;
        let row = t.users.get_mut(id, "user")?;
        row.failed_login_attempts = 0;
        row.last_login_at = Some(at);
        Ok(row.clone())
    }

    fn apply_transition(
        &self,
        id: UserId,
        transition: &Transition,
        locked_until: Option<DateTime<Utc>>,
    ) -> DomainResult<User> {
        let mut t = self.write()?;
        let row = t.users.get_mut(id, "user")?;
        if row.status != transition.from {
            return Err(DomainError::conflict(format!(
                "user {id} status changed concurrently (expected {}, found {})",
                transition.from, row.status
            )));
        }
        row.apply_transition(transition, locked_until);
        Ok(row.clone())
    }

    fn delete_user(&self, id: UserId) -> DomainResult<(User, Vec<UserRoleAssignment>)> {
        let mut t = self.write()?;
        let Some(user) = t.users.rows.remove(&id) else {
            return Err(DomainError::not_found(format!("user {id}")));
        };
        let mut revoked = Vec::new();
        t.assignments.retain(|(u, _), a| {
            if *u == id {
                revoked.push(a.clone());
                false
            } else {
                true
            }
        });
        Ok((user, revoked))
    }

    fn insert_assignment(&self, assignment: UserRoleAssignment) -> DomainResult<()> {
        let mut t = self.write()?;
        let key = (assignment.user_id, assignment.role_id);
        if t.assignments.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "role {} is already assigned to user {}",
                assignment.role_id, assignment.user_id
            )));
        }
        t.assignments.insert(key, assignment);
        Ok(())
    }

    fn delete_assignment(&self, user_id: UserId, role_id: RoleId) -> DomainResult<bool> {
        Ok(self.write()?.assignments.remove(&(user_id, role_id)).is_some())
    }

    fn assignments_for_user(&self, user_id: UserId) -> DomainResult<Vec<UserRoleAssignment>> {
        let t = self.read()?;
        Ok(t.assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    fn assignments_for_role(&self, role_id: RoleId) -> DomainResult<Vec<UserRoleAssignment>> {
        let t = self.read()?;
        Ok(t.assignments
            .values()
            .filter(|a| a.role_id == role_id)
            .cloned()
            .collect())
    }

    fn delete_expired_assignments(&self, now: DateTime<Utc>) -> DomainResult<Vec<UserRoleAssignment>> {
        let mut t = self.write()?;
        let mut expired = Vec::new();
        t.assignments.retain(|_, a| {
            if a.is_expired(now) {
                expired.push(a.clone());
                false
            } else {
                true
            }
        });
        Ok(expired)
    }
}
