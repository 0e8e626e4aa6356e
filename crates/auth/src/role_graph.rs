//! Role hierarchy and role→permission grants.
//!
//! Roles form a forest: each role has at most one parent, chains never
//! cycle and never cross a tenant boundary. Hierarchy writes for one tenant
//! are serialized so that two concurrent `set_parent` calls cannot each pass
//! the cycle check and jointly close a loop.
//!
//! Effective permissions of a role are its ALLOW grants plus those of every
//! ancestor, minus the permissions the role itself DENYs. A DENY does not
//! reach the role's descendants.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use uniauth_core::{DomainError, DomainResult, PermissionId, RoleId, SystemId};

use crate::actor::Actor;
use crate::audit::{AuditSink, AuthorityEvent, GrantChange, HierarchyChange};
use crate::bulk::BulkReport;
use crate::model::{AccessLevel, NewRole, PermissionSet, Role, RolePermission, RoleUpdate};
use crate::store::AuthorityStore;

/// One mutex per tenant (`None` = global roles).
#[derive(Debug, Default)]
struct HierarchyLocks {
    locks: Mutex<HashMap<Option<SystemId>, Arc<Mutex<()>>>>,
}

impl HierarchyLocks {
    fn for_tenant(&self, tenant: Option<SystemId>) -> DomainResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DomainError::invariant("hierarchy lock table poisoned"))?;
        Ok(locks.entry(tenant).or_default().clone())
    }
}

fn poisoned<T>(_: T) -> DomainError {
    DomainError::invariant("hierarchy lock poisoned")
}

pub struct RoleGraph {
    store: Arc<dyn AuthorityStore>,
    audit: Arc<dyn AuditSink>,
    locks: HierarchyLocks,
}

impl RoleGraph {
    pub fn new(store: Arc<dyn AuthorityStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            locks: HierarchyLocks::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_role(&self, new: NewRole, actor: &Actor) -> DomainResult<Role> {
        new.validate()?;
        if let Some(system_id) = new.system_id {
            if self.store.system(system_id)?.is_none() {
                return Err(DomainError::not_found(format!("system {system_id}")));
            }
        }

        let role = new.into_role(Utc::now());
        let tenant_lock = self.locks.for_tenant(role.system_id)?;
        let _guard = tenant_lock.lock().map_err(poisoned)?;

        if let Some(parent_id) = role.parent_id {
            self.check_parent(&role, parent_id)?;
        }
        self.store.insert_role(role.clone())?;

        info!(role = %role.code, parent = ?role.parent_id, actor = %actor, "role created");
        self.emit_hierarchy(&role, HierarchyChange::Created { parent_id: role.parent_id }, actor);
        Ok(role)
    }

    /// Updates descriptive attributes. A system role can never be demoted.
    pub fn update_role(&self, id: RoleId, update: RoleUpdate, actor: &Actor) -> DomainResult<Role> {
        let role = self.store.update_role(id, &update)?;
        info!(role = %role.code, actor = %actor, "role updated");
        self.emit_hierarchy(&role, HierarchyChange::Updated, actor);
        Ok(role)
    }

    pub fn get_role(&self, id: RoleId) -> DomainResult<Role> {
        self.store
            .role(id)?
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))
    }

    pub fn find_role_by_code(&self, code: &str) -> DomainResult<Option<Role>> {
        self.store.role_by_code(code)
    }

    /// Roles of a tenant, highest priority first. `None` lists global roles.
    pub fn roles_for_system(&self, system_id: Option<SystemId>) -> DomainResult<Vec<Role>> {
        let mut roles = self.store.roles_for_system(system_id)?;
        roles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.code.cmp(&b.code)));
        Ok(roles)
    }

    pub fn children(&self, id: RoleId) -> DomainResult<Vec<Role>> {
        self.get_role(id)?;
        self.store.children_of(id)
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, id: RoleId) -> DomainResult<Vec<Role>> {
        let role = self.get_role(id)?;
        let mut chain = Vec::new();
        let mut visited = BTreeSet::from([role.id]);
        let mut next = role.parent_id;
        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                warn!(role = %role.code, %parent_id, "cycle in role hierarchy; truncating ancestor walk");
                break;
            }
            let Some(parent) = self.store.role(parent_id)? else {
                break;
            };
            next = parent.parent_id;
            chain.push(parent);
        }
        Ok(chain)
    }

    /// Re-points the role's parent (`None` detaches).
    pub fn set_parent(&self, id: RoleId, parent: Option<RoleId>, actor: &Actor) -> DomainResult<Role> {
        let tenant = self.get_role(id)?.system_id;
        let tenant_lock = self.locks.for_tenant(tenant)?;
        let _guard = tenant_lock.lock().map_err(poisoned)?;

        let current = self.get_role(id)?;
        if let Some(parent_id) = parent {
            self.check_parent(&current, parent_id)?;
        }

        let previous = current.parent_id;
        let role = self.store.set_role_parent(id, parent)?;

        info!(role = %role.code, from = ?previous, to = ?parent, actor = %actor, "role reparented");
        self.emit_hierarchy(&role, HierarchyChange::Reparented { from: previous, to: parent }, actor);
        Ok(role)
    }

    /// Walks the candidate's ancestor chain; O(depth).
    fn check_parent(&self, role: &Role, parent_id: RoleId) -> DomainResult<()> {
        if parent_id == role.id {
            return Err(DomainError::cycle(format!("role '{}' cannot be its own parent", role.code)));
        }
        let parent = self.get_role(parent_id)?;
        if parent.system_id != role.system_id {
            return Err(DomainError::scope_mismatch(format!(
                "role '{}' and parent '{}' belong to different tenants",
                role.code, parent.code
            )));
        }

        let mut visited = BTreeSet::new();
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current.id == role.id {
                return Err(DomainError::cycle(format!(
                    "'{}' is a descendant of '{}'",
                    parent_id, role.code
                )));
            }
            if !visited.insert(current.id) {
                return Err(DomainError::cycle(format!(
                    "existing hierarchy above role {} is cyclic",
                    current.id
                )));
            }
            cursor = match current.parent_id {
                Some(next) => self.store.role(next)?,
                None => None,
            };
        }
        Ok(())
    }

    /// Deletes a role and moves its children to its parent in one step.
    /// Returns the children that moved.
    pub fn delete_role(&self, id: RoleId, actor: &Actor) -> DomainResult<Vec<RoleId>> {
        let tenant = self.get_role(id)?.system_id;
        let tenant_lock = self.locks.for_tenant(tenant)?;
        let _guard = tenant_lock.lock().map_err(poisoned)?;
        let (role, moved) = self.store.delete_role_reparenting(id)?;

        warn!(role = %role.code, reparented = moved.len(), actor = %actor, "role deleted");
        self.emit_hierarchy(
            &role,
            HierarchyChange::Deleted {
                reparented_children: moved.clone(),
            },
            actor,
        );
        Ok(moved)
    }

    pub fn bulk_delete_roles(&self, ids: &[RoleId], actor: &Actor) -> BulkReport<RoleId> {
        let mut report = BulkReport::new();
        for id in ids {
            report.record(*id, self.delete_role(*id, actor));
        }
        report
    }

    // ─────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────

    pub fn assign_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        access_level: AccessLevel,
        actor: &Actor,
    ) -> DomainResult<RolePermission> {
        let role = self.get_role(role_id)?;
        let permission = self
            .store
            .permission(permission_id)?
            .ok_or_else(|| DomainError::not_found(format!("permission {permission_id}")))?;
        if role.system_id != Some(permission.system_id) {
            return Err(DomainError::scope_mismatch(format!(
                "permission '{}' is not owned by the tenant of role '{}'",
                permission.code, role.code
            )));
        }

        let grant = RolePermission {
            role_id,
            permission_id,
            access_level,
            assigned_at: Utc::now(),
            assigned_by: actor.clone(),
        };
        self.store.insert_grant(grant.clone())?;

        info!(role = %role.code, permission = %permission.code, %access_level, actor = %actor, "permission granted");
        self.audit.emit(AuthorityEvent::PermissionGrantChanged {
            role_id,
            permission_id,
            change: GrantChange::Granted { access_level },
            actor: actor.clone(),
            occurred_at: grant.assigned_at,
        });
        Ok(grant)
    }

    pub fn revoke_permission(&self, role_id: RoleId, permission_id: PermissionId, actor: &Actor) -> DomainResult<()> {
        if !self.store.delete_grant(role_id, permission_id)? {
            return Err(DomainError::not_found(format!(
                "permission {permission_id} is not assigned to role {role_id}"
            )));
        }
        info!(%role_id, %permission_id, actor = %actor, "permission revoked");
        self.audit.emit(AuthorityEvent::PermissionGrantChanged {
            role_id,
            permission_id,
            change: GrantChange::Revoked,
            actor: actor.clone(),
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    pub fn grants(&self, role_id: RoleId) -> DomainResult<Vec<RolePermission>> {
        self.get_role(role_id)?;
        self.store.grants_for_role(role_id)
    }

    /// The role's own ALLOW grants.
    pub fn direct_permissions(&self, role_id: RoleId) -> DomainResult<PermissionSet> {
        self.get_role(role_id)?;
        self.load(self.grant_ids(role_id, AccessLevel::Allow)?)
    }

    /// The role's own DENY grants.
    pub fn denied_permissions(&self, role_id: RoleId) -> DomainResult<PermissionSet> {
        self.get_role(role_id)?;
        self.load(self.grant_ids(role_id, AccessLevel::Deny)?)
    }

    pub fn effective_permissions(&self, role_id: RoleId) -> DomainResult<PermissionSet> {
        let role = self.get_role(role_id)?;

        let mut allowed = self.grant_ids(role.id, AccessLevel::Allow)?;
        for ancestor in self.ancestors(role.id)? {
            allowed.extend(self.grant_ids(ancestor.id, AccessLevel::Allow)?);
        }
        for denied in self.grant_ids(role.id, AccessLevel::Deny)? {
            allowed.remove(&denied);
        }

        debug!(role = %role.code, count = allowed.len(), "effective permissions resolved");
        self.load(allowed)
    }

    fn grant_ids(&self, role_id: RoleId, level: AccessLevel) -> DomainResult<BTreeSet<PermissionId>> {
        Ok(self
            .store
            .grants_for_role(role_id)?
            .into_iter()
            .filter(|g| g.access_level == level)
            .map(|g| g.permission_id)
            .collect())
    }

    fn load(&self, ids: BTreeSet<PermissionId>) -> DomainResult<PermissionSet> {
        let mut set = PermissionSet::new();
        for id in ids {
            if let Some(permission) = self.store.permission(id)? {
                set.insert(permission);
            }
        }
        Ok(set)
    }

    fn emit_hierarchy(&self, role: &Role, change: HierarchyChange, actor: &Actor) {
        self.audit.emit(AuthorityEvent::RoleHierarchyChanged {
            role_id: role.id,
            system_id: role.system_id,
            change,
            actor: actor.clone(),
            occurred_at: Utc::now(),
        });
    }
}
