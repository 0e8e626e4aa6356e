//! Tenant-scoped registry of grantable permissions.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use uniauth_core::{DomainError, DomainResult, PermissionId, SystemId};

use crate::actor::Actor;
use crate::audit::{AuditSink, AuthorityEvent, CatalogChange};
use crate::model::{NewPermission, Permission, PermissionStats, System};
use crate::store::AuthorityStore;

const CRUD_ACTIONS: [&str; 4] = ["CREATE", "READ", "UPDATE", "DELETE"];

pub struct PermissionCatalog {
    store: Arc<dyn AuthorityStore>,
    audit: Arc<dyn AuditSink>,
}

impl PermissionCatalog {
    pub fn new(store: Arc<dyn AuthorityStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    fn owning_system(&self, system_id: SystemId) -> DomainResult<System> {
        self.store
            .system(system_id)?
            .ok_or_else(|| DomainError::not_found(format!("system {system_id}")))
    }

    pub fn create_permission(&self, system_id: SystemId, new: NewPermission, actor: &Actor) -> DomainResult<Permission> {
        let mut created = self.create_permissions(system_id, vec![new], actor)?;
        created
            .pop()
            .ok_or_else(|| DomainError::invariant("batch insert returned nothing"))
    }

    /// All-or-nothing: a single duplicate code rejects the whole batch.
    pub fn create_permissions(
        &self,
        system_id: SystemId,
        batch: Vec<NewPermission>,
        actor: &Actor,
    ) -> DomainResult<Vec<Permission>> {
        let system = self.owning_system(system_id)?;
        for new in &batch {
            new.validate()?;
        }

        let now = Utc::now();
        let permissions: Vec<Permission> = batch
            .into_iter()
            .map(|new| new.into_permission(system.id, now))
            .collect();
        self.store.insert_permissions(permissions.clone())?;

        for p in &permissions {
            info!(system = %system.code, permission = %p.code, actor = %actor, "permission created");
            self.audit.emit(AuthorityEvent::CatalogChanged {
                system_id: system.id,
                permission_id: p.id,
                change: CatalogChange::Created { code: p.code.clone() },
                actor: actor.clone(),
                occurred_at: now,
            });
        }
        Ok(permissions)
    }

    /// `<RESOURCE>_CREATE`, `_READ`, `_UPDATE` and `_DELETE` for one resource.
    pub fn create_crud_permissions(&self, system_id: SystemId, resource: &str, actor: &Actor) -> DomainResult<Vec<Permission>> {
        self.create_module_permissions(system_id, resource, &CRUD_ACTIONS, actor)
    }

    /// `<MODULE>_<ACTION>` for each action.
    pub fn create_module_permissions(
        &self,
        system_id: SystemId,
        module: &str,
        actions: &[&str],
        actor: &Actor,
    ) -> DomainResult<Vec<Permission>> {
        let module_upper = module.trim().to_uppercase();
        if module_upper.is_empty() {
            return Err(DomainError::validation("module name cannot be empty"));
        }
        let batch = actions
            .iter()
            .map(|action| {
                let action_upper = action.trim().to_uppercase();
                NewPermission::new(
                    format!("{module_upper}_{action_upper}"),
                    format!("{} {module}", capitalize(&action_upper)),
                    module_upper.clone(),
                    action_upper.clone(),
                )
                .with_description(format!("Permission to {} {module}", action_upper.to_lowercase()))
            })
            .collect();
        self.create_permissions(system_id, batch, actor)
    }

    pub fn get_permission(&self, id: PermissionId) -> DomainResult<Permission> {
        self.store
            .permission(id)?
            .ok_or_else(|| DomainError::not_found(format!("permission {id}")))
    }

    pub fn find_permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>> {
        debug!(code, "permission lookup");
        self.store.permission_by_code(code)
    }

    pub fn permissions_for_system(&self, system_id: SystemId) -> DomainResult<Vec<Permission>> {
        self.store.permissions_for_system(system_id)
    }

    pub fn permissions_by_resource_type(&self, system_id: SystemId, resource_type: &str) -> DomainResult<Vec<Permission>> {
        Ok(self
            .store
            .permissions_for_system(system_id)?
            .into_iter()
            .filter(|p| p.resource_type.eq_ignore_ascii_case(resource_type))
            .collect())
    }

    pub fn distinct_resource_types(&self, system_id: SystemId) -> DomainResult<BTreeSet<String>> {
        Ok(self
            .store
            .permissions_for_system(system_id)?
            .into_iter()
            .map(|p| p.resource_type)
            .collect())
    }

    /// `Conflict` while any role still grants the permission.
    pub fn delete_permission(&self, id: PermissionId, actor: &Actor) -> DomainResult<Permission> {
        let permission = self.store.delete_permission(id)?;
        info!(permission = %permission.code, actor = %actor, "permission deleted");
        self.audit.emit(AuthorityEvent::CatalogChanged {
            system_id: permission.system_id,
            permission_id: permission.id,
            change: CatalogChange::Deleted { code: permission.code.clone() },
            actor: actor.clone(),
            occurred_at: Utc::now(),
        });
        Ok(permission)
    }

    pub fn permission_stats(&self, system_id: SystemId) -> DomainResult<PermissionStats> {
        self.owning_system(system_id)?;
        let mut stats = PermissionStats::default();
        for p in self.store.permissions_for_system(system_id)? {
            stats.total += 1;
            if self.store.grants_for_permission(p.id)?.is_empty() {
                stats.unassigned += 1;
            } else {
                stats.assigned += 1;
            }
            if p.is_sensitive {
                stats.sensitive += 1;
            }
            *stats.by_resource_type.entry(p.resource_type).or_default() += 1;
            *stats.by_action.entry(p.action).or_default() += 1;
            *stats.by_risk_level.entry(p.risk_level).or_default() += 1;
        }
        Ok(stats)
    }
}

fn capitalize(upper: &str) -> String {
    let lower = upper.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
