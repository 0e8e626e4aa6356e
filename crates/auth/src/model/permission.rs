use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uniauth_core::{DomainError, DomainResult, Entity, PermissionId, RoleId, SystemId};

use crate::actor::Actor;
use crate::risk::RiskLevel;

/// A grantable capability owned by exactly one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub system_id: SystemId,
    pub resource_type: String,
    pub action: String,
    pub risk_level: RiskLevel,
    pub is_sensitive: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> PermissionId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource_type: String,
    pub action: String,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub is_sensitive: bool,
}

impl NewPermission {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            resource_type: resource_type.into(),
            action: action.into(),
            risk_level: RiskLevel::default(),
            is_sensitive: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    pub(crate) fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("permission code cannot be empty"));
        }
        if self.code.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission code '{}' contains whitespace",
                self.code
            )));
        }
        if self.resource_type.trim().is_empty() || self.action.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "permission '{}' needs a resource type and an action",
                self.code
            )));
        }
        Ok(())
    }

    pub(crate) fn into_permission(self, system_id: SystemId, now: DateTime<Utc>) -> Permission {
        Permission {
            id: PermissionId::new(),
            code: self.code,
            name: self.name,
            description: self.description,
            system_id,
            resource_type: self.resource_type,
            action: self.action,
            risk_level: self.risk_level,
            is_sensitive: self.is_sensitive,
            created_at: now,
        }
    }
}

/// Whether a role grant allows or explicitly denies its permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    #[default]
    Allow,
    Deny,
}

impl core::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            AccessLevel::Allow => "ALLOW",
            AccessLevel::Deny => "DENY",
        })
    }
}

/// Join row: a role's grant of one permission. Unique per (role, permission).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub access_level: AccessLevel,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Actor,
}

/// Resolved permissions keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    by_code: BTreeMap<String, Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: Permission) {
        self.by_code.insert(permission.code.clone(), permission);
    }

    pub fn remove(&mut self, code: &str) -> Option<Permission> {
        self.by_code.remove(code)
    }

    pub fn extend(&mut self, other: PermissionSet) {
        self.by_code.extend(other.by_code);
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn get(&self, code: &str) -> Option<&Permission> {
        self.by_code.get(code)
    }

    pub fn codes(&self) -> BTreeSet<String> {
        self.by_code.keys().cloned().collect()
    }

    pub fn ids(&self) -> BTreeSet<PermissionId> {
        self.by_code.values().map(|p| p.id).collect()
    }

    /// Keep only permissions owned by `system_id`.
    pub fn retain_system(&mut self, system_id: SystemId) {
        self.by_code.retain(|_, p| p.system_id == system_id);
    }

    pub fn is_subset(&self, other: &PermissionSet) -> bool {
        self.by_code.keys().all(|c| other.contains(c))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.by_code.values()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

impl IntoIterator for PermissionSet {
    type Item = Permission;
    type IntoIter = std::collections::btree_map::IntoValues<String, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_code.into_values()
    }
}

/// Catalog statistics for one system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStats {
    pub total: usize,
    pub assigned: usize,
    pub unassigned: usize,
    pub sensitive: usize,
    pub by_resource_type: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub by_risk_level: BTreeMap<RiskLevel, usize>,
}
