//! Registered client systems and their key material.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use uniauth_core::{DomainError, DomainResult, SystemId};

use crate::actor::Actor;
use crate::audit::{AuditSink, AuthorityEvent, SystemChange};
use crate::model::{DEFAULT_RATE_LIMIT, IssuedCredentials, NewSystem, System, SystemStats, SystemUpdate};
use crate::secrets::{CredentialIssuer, SecretHasher};
use crate::store::AuthorityStore;

pub struct TenantRegistry {
    store: Arc<dyn AuthorityStore>,
    audit: Arc<dyn AuditSink>,
    issuer: CredentialIssuer,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn AuthorityStore>, audit: Arc<dyn AuditSink>, issuer: CredentialIssuer) -> Self {
        Self { store, audit, issuer }
    }

    /// Registers a system and returns its credentials. The plaintext secret
    /// is not recoverable afterwards.
    pub fn register_system(&self, new: NewSystem, actor: &Actor) -> DomainResult<(System, IssuedCredentials)> {
        new.validate()?;
        if self.store.system_by_code(&new.code)?.is_some() {
            return Err(DomainError::conflict(format!("system code '{}' already exists", new.code)));
        }

        let now = Utc::now();
        let (credentials, secret_hash) = self.issuer.issue(now);
        let system = System {
            id: SystemId::new(),
            code: new.code,
            name: new.name,
            description: new.description,
            base_url: new.base_url,
            is_active: true,
            api_key: credentials.api_key.clone(),
            secret_hash,
            rate_limit: new.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
            keys_issued_at: now,
            keys_expire_at: credentials.expires_at,
            registered_at: now,
            updated_at: now,
        };
        self.store.insert_system(system.clone())?;

        info!(system = %system.code, api_key = %system.api_key, actor = %actor, "system registered");
        self.emit(&system, SystemChange::Registered, actor);
        Ok((system, credentials))
    }

    pub fn get_system(&self, id: SystemId) -> DomainResult<System> {
        self.store
            .system(id)?
            .ok_or_else(|| DomainError::not_found(format!("system {id}")))
    }

    pub fn find_system_by_code(&self, code: &str) -> DomainResult<Option<System>> {
        debug!(code, "system lookup");
        self.store.system_by_code(code)
    }

    pub(crate) fn find_system_by_api_key(&self, api_key: &str) -> DomainResult<Option<System>> {
        self.store.system_by_api_key(api_key)
    }

    pub fn list_systems(&self, active_only: bool) -> DomainResult<Vec<System>> {
        let mut systems = self.store.systems()?;
        if active_only {
            systems.retain(|s| s.is_active);
        }
        systems.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(systems)
    }

    /// Applies an administrative update. Deactivating a system whose roles
    /// are still held by users is refused. Key material is left alone.
    pub fn update_system(&self, id: SystemId, update: SystemUpdate, actor: &Actor) -> DomainResult<System> {
        let (previous, system) = self.store.update_system(id, &update, Utc::now())?;

        let change = match (previous.is_active, system.is_active) {
            (false, true) => SystemChange::Activated,
            (true, false) => SystemChange::Deactivated,
            _ => SystemChange::Updated,
        };
        info!(system = %system.code, ?change, actor = %actor, "system updated");
        self.emit(&system, change, actor);
        Ok(system)
    }

    pub fn activate_system(&self, id: SystemId, actor: &Actor) -> DomainResult<System> {
        self.update_system(id, SystemUpdate { is_active: Some(true), ..Default::default() }, actor)
    }

    pub fn deactivate_system(&self, id: SystemId, actor: &Actor) -> DomainResult<System> {
        self.update_system(id, SystemUpdate { is_active: Some(false), ..Default::default() }, actor)
    }

    /// `InvariantViolation` while the system owns roles or permissions.
    pub fn delete_system(&self, id: SystemId, actor: &Actor) -> DomainResult<System> {
        let system = self.store.delete_system(id)?;
        warn!(system = %system.code, actor = %actor, "system deleted");
        self.emit(&system, SystemChange::Deleted, actor);
        Ok(system)
    }

    pub fn system_stats(&self, code: &str) -> DomainResult<SystemStats> {
        let system = self
            .store
            .system_by_code(code)?
            .ok_or_else(|| DomainError::not_found(format!("system '{code}'")))?;
        Ok(SystemStats {
            system_id: system.id,
            roles: self.store.roles_for_system(Some(system.id))?.len(),
            permissions: self.store.permissions_for_system(system.id)?.len(),
            role_holders: self.role_holders(system.id)?,
            is_active: system.is_active,
            keys_expired: system.keys_expired(Utc::now()),
        })
    }

    pub(crate) fn hasher(&self) -> &dyn SecretHasher {
        self.issuer.hasher()
    }

    /// Replaces the key pair. Only the new hash is persisted.
    pub(crate) fn rotate_credentials(&self, id: SystemId, actor: &Actor) -> DomainResult<(System, IssuedCredentials)> {
        let now = Utc::now();
        let (credentials, secret_hash) = self.issuer.issue(now);
        let system = self.store.replace_system_keys(
            id,
            credentials.api_key.clone(),
            secret_hash,
            now,
            credentials.expires_at,
        )?;
        self.emit(&system, SystemChange::KeysRegenerated, actor);
        Ok((system, credentials))
    }

    /// Expires the current key pair immediately.
    pub(crate) fn expire_credentials(&self, id: SystemId, actor: &Actor) -> DomainResult<System> {
        let system = self.store.expire_system_keys(id, Utc::now())?;
        self.emit(&system, SystemChange::KeysRevoked, actor);
        Ok(system)
    }

    fn role_holders(&self, id: SystemId) -> DomainResult<usize> {
        let mut holders = 0;
        for role in self.store.roles_for_system(Some(id))? {
            holders += self.store.assignments_for_role(role.id)?.len();
        }
        Ok(holders)
    }

    fn emit(&self, system: &System, change: SystemChange, actor: &Actor) {
        self.audit.emit(AuthorityEvent::SystemChanged {
            system_id: system.id,
            code: system.code.clone(),
            change,
            actor: actor.clone(),
            occurred_at: system.updated_at,
        });
    }
}
