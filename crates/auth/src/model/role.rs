use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uniauth_core::{DomainError, DomainResult, Entity, RoleId, SystemId};

/// A named bundle of permissions, optionally inheriting from one parent.
///
/// `system_id` is `None` only for global roles. The parent chain is acyclic
/// and never crosses a tenant boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub system_id: Option<SystemId>,
    pub is_system_role: bool,
    pub is_default: bool,
    pub parent_id: Option<RoleId>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_id: Option<SystemId>,
    #[serde(default)]
    pub is_system_role: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub parent_id: Option<RoleId>,
    #[serde(default)]
    pub priority: i32,
}

impl NewRole {
    /// A tenant-scoped role.
    pub fn new(system_id: SystemId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            system_id: Some(system_id),
            ..Self::global(code, name)
        }
    }

    /// A role that belongs to no tenant.
    pub fn global(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            system_id: None,
            is_system_role: false,
            is_default: false,
            parent_id: None,
            priority: 0,
        }
    }

    pub fn with_parent(mut self, parent_id: RoleId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn system_role(mut self) -> Self {
        self.is_system_role = true;
        self
    }

    pub fn default_role(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub(crate) fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("role code cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        Ok(())
    }

    pub(crate) fn into_role(self, now: DateTime<Utc>) -> Role {
        Role {
            id: RoleId::new(),
            code: self.code,
            name: self.name,
            description: self.description,
            system_id: self.system_id,
            is_system_role: self.is_system_role,
            is_default: self.is_default,
            parent_id: self.parent_id,
            priority: self.priority,
            created_at: now,
        }
    }
}

/// Mutable role attributes. Tenant binding, code and parent are changed elsewhere or never.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
    pub is_system_role: Option<bool>,
    pub priority: Option<i32>,
}

impl RoleUpdate {
    pub(crate) fn apply_to(&self, role: &mut Role) -> DomainResult<()> {
        if self.is_system_role == Some(false) && role.is_system_role {
            return Err(DomainError::invariant(format!(
                "role '{}' is a system role and cannot be demoted",
                role.code
            )));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("role name cannot be empty"));
            }
            role.name = name.clone();
        }
        if let Some(description) = &self.description {
            role.description = Some(description.clone());
        }
        if let Some(is_default) = self.is_default {
            role.is_default = is_default;
        }
        if let Some(is_system_role) = self.is_system_role {
            role.is_system_role = is_system_role;
        }
        if let Some(priority) = self.priority {
            role.priority = priority;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_role_cannot_be_demoted() {
        let mut role = NewRole::global("SUPER_ADMIN", "Super admin").system_role().into_role(Utc::now());

        let err = RoleUpdate { is_system_role: Some(false), ..Default::default() }
            .apply_to(&mut role)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(role.is_system_role);
    }

    #[test]
    fn promotion_is_allowed() {
        let mut role = NewRole::new(SystemId::new(), "ADMIN", "Admin").into_role(Utc::now());
        RoleUpdate { is_system_role: Some(true), priority: Some(10), ..Default::default() }
            .apply_to(&mut role)
            .unwrap();
        assert!(role.is_system_role);
        assert_eq!(role.priority, 10);
    }
}
