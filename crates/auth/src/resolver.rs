//! Effective permissions of users and the permission checks built on them.
//!
//! Permission sets may be served from a per-user cache for up to
//! [`MAX_CACHE_TTL`]. User status is always read fresh, so login gating is
//! never stale even when the permission set is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use uniauth_core::{DomainError, DomainResult, SystemId, UserId};

use crate::directory::UserDirectory;
use crate::model::{LoginDecision, PermissionSet, SystemIdentity, User};
use crate::role_graph::RoleGraph;
use crate::store::AuthorityStore;

pub const MAX_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct PermissionCache {
    ttl: Duration,
    entries: Mutex<HashMap<UserId, (Instant, PermissionSet)>>,
}

impl PermissionCache {
    fn get(&self, user_id: UserId) -> Option<PermissionSet> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&user_id)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, set)| set.clone())
    }

    fn put(&self, user_id: UserId, set: PermissionSet) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(user_id, (Instant::now(), set));
        }
    }

    fn remove(&self, user_id: UserId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&user_id);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

pub struct AccessResolver {
    store: Arc<dyn AuthorityStore>,
    graph: Arc<RoleGraph>,
    directory: Arc<UserDirectory>,
    cache: Option<PermissionCache>,
}

impl AccessResolver {
    /// `cache_ttl` of zero disables caching; larger values are capped at [`MAX_CACHE_TTL`].
    pub fn new(
        store: Arc<dyn AuthorityStore>,
        graph: Arc<RoleGraph>,
        directory: Arc<UserDirectory>,
        cache_ttl: Duration,
    ) -> Self {
        let cache = (!cache_ttl.is_zero()).then(|| PermissionCache {
            ttl: cache_ttl.min(MAX_CACHE_TTL),
            entries: Mutex::new(HashMap::new()),
        });
        Self {
            store,
            graph,
            directory,
            cache,
        }
    }

    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Union of the effective permissions of every role the user holds now.
    pub fn user_effective_permissions(&self, user_id: UserId) -> DomainResult<PermissionSet> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(user_id)) {
            debug!(%user_id, "permission cache hit");
            return Ok(cached);
        }
        let set = self.user_effective_permissions_at(user_id, Utc::now())?;
        if let Some(cache) = &self.cache {
            cache.put(user_id, set.clone());
        }
        Ok(set)
    }

    /// Same as [`Self::user_effective_permissions`] at an explicit instant, uncached.
    pub fn user_effective_permissions_at(&self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<PermissionSet> {
        let mut set = PermissionSet::new();
        for assignment in self.directory.active_assignments(user_id, now)? {
            match self.graph.effective_permissions(assignment.role_id) {
                Ok(role_set) => set.extend(role_set),
                // Role deleted between the two reads.
                Err(DomainError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(set)
    }

    /// False for any user whose status forbids login.
    pub fn has_permission(&self, user_id: UserId, code: &str) -> DomainResult<bool> {
        self.gated(user_id, |set| set.contains(code))
    }

    pub fn has_any(&self, user_id: UserId, codes: &[&str]) -> DomainResult<bool> {
        self.gated(user_id, |set| codes.iter().any(|c| set.contains(c)))
    }

    /// Vacuously true for an empty `codes` when the user may log in.
    pub fn has_all(&self, user_id: UserId, codes: &[&str]) -> DomainResult<bool> {
        self.gated(user_id, |set| codes.iter().all(|c| set.contains(c)))
    }

    fn gated(&self, user_id: UserId, check: impl FnOnce(&PermissionSet) -> bool) -> DomainResult<bool> {
        let user = self.directory.get_user(user_id)?;
        if !user.status.can_login() {
            debug!(%user_id, status = %user.status, "permission check gated by status");
            return Ok(false);
        }
        Ok(check(&self.user_effective_permissions(user_id)?))
    }

    /// The user's effective permissions owned by one system.
    pub fn permissions_scoped_to_system(&self, user_id: UserId, system_code: &str) -> DomainResult<PermissionSet> {
        let system = self
            .store
            .system_by_code(system_code)?
            .ok_or_else(|| DomainError::not_found(format!("system '{system_code}'")))?;
        self.scoped(user_id, system.id)
    }

    /// Scoped permissions for a caller already verified by the trust gateway.
    pub fn permissions_for_caller(&self, caller: &SystemIdentity, user_id: UserId) -> DomainResult<PermissionSet> {
        self.scoped(user_id, caller.system_id)
    }

    fn scoped(&self, user_id: UserId, system_id: SystemId) -> DomainResult<PermissionSet> {
        self.directory.get_user(user_id)?;
        let mut set = self.user_effective_permissions(user_id)?;
        set.retain_system(system_id);
        Ok(set)
    }

    pub fn login_check(&self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<LoginDecision> {
        let user: User = self.directory.get_user(user_id)?;
        Ok(user.login_decision(now))
    }

    pub fn invalidate(&self, user_id: UserId) {
        if let Some(cache) = &self.cache {
            cache.remove(user_id);
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}
