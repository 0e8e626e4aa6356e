//! Change notifications for external audit and notification collaborators.
//!
//! Every successful mutation emits one [`AuthorityEvent`] after the store
//! write commits. Emission is fire-and-forget: a sink failure is logged and
//! never undoes the mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use uniauth_core::{PermissionId, RoleId, SystemId, UserId};
use uniauth_events::{Event, EventBus};

use crate::actor::Actor;
use crate::lifecycle::{LifecycleAction, UserStatus};
use crate::model::AccessLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum AssignmentChange {
    Assigned { expires_at: Option<DateTime<Utc>> },
    Revoked,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum GrantChange {
    Granted { access_level: AccessLevel },
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum HierarchyChange {
    Created { parent_id: Option<RoleId> },
    Updated,
    Reparented { from: Option<RoleId>, to: Option<RoleId> },
    Deleted { reparented_children: Vec<RoleId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum CatalogChange {
    Created { code: String },
    Deleted { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemChange {
    Registered,
    Updated,
    Activated,
    Deactivated,
    Deleted,
    KeysRegenerated,
    KeysRevoked,
}

/// A committed change in the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityEvent {
    StatusChanged {
        user_id: UserId,
        action: LifecycleAction,
        old_status: UserStatus,
        new_status: UserStatus,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    UserRegistered {
        user_id: UserId,
        username: String,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    UserUpdated {
        user_id: UserId,
        username: String,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    UserDeleted {
        user_id: UserId,
        username: String,
        revoked_roles: Vec<RoleId>,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    RoleAssignmentChanged {
        user_id: UserId,
        role_id: RoleId,
        #[serde(flatten)]
        change: AssignmentChange,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    PermissionGrantChanged {
        role_id: RoleId,
        permission_id: PermissionId,
        #[serde(flatten)]
        change: GrantChange,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    RoleHierarchyChanged {
        role_id: RoleId,
        system_id: Option<SystemId>,
        #[serde(flatten)]
        change: HierarchyChange,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    CatalogChanged {
        system_id: SystemId,
        permission_id: PermissionId,
        #[serde(flatten)]
        change: CatalogChange,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
    SystemChanged {
        system_id: SystemId,
        code: String,
        change: SystemChange,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    },
}

impl AuthorityEvent {
    pub fn actor(&self) -> &Actor {
        match self {
            AuthorityEvent::StatusChanged { actor, .. }
            | AuthorityEvent::UserRegistered { actor, .. }
            | AuthorityEvent::UserUpdated { actor, .. }
            | AuthorityEvent::UserDeleted { actor, .. }
            | AuthorityEvent::RoleAssignmentChanged { actor, .. }
            | AuthorityEvent::PermissionGrantChanged { actor, .. }
            | AuthorityEvent::RoleHierarchyChanged { actor, .. }
            | AuthorityEvent::CatalogChanged { actor, .. }
            | AuthorityEvent::SystemChanged { actor, .. } => actor,
        }
    }

    /// JSON form for audit writers.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Event for AuthorityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuthorityEvent::StatusChanged { .. } => "uniauth.user.status_changed",
            AuthorityEvent::UserRegistered { .. } => "uniauth.user.registered",
            AuthorityEvent::UserUpdated { .. } => "uniauth.user.updated",
            AuthorityEvent::UserDeleted { .. } => "uniauth.user.deleted",
            AuthorityEvent::RoleAssignmentChanged { .. } => "uniauth.user.role_assignment_changed",
            AuthorityEvent::PermissionGrantChanged { .. } => "uniauth.role.permission_grant_changed",
            AuthorityEvent::RoleHierarchyChanged { .. } => "uniauth.role.hierarchy_changed",
            AuthorityEvent::CatalogChanged { .. } => "uniauth.permission.catalog_changed",
            AuthorityEvent::SystemChanged { .. } => "uniauth.system.changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AuthorityEvent::StatusChanged { occurred_at, .. }
            | AuthorityEvent::UserRegistered { occurred_at, .. }
            | AuthorityEvent::UserUpdated { occurred_at, .. }
            | AuthorityEvent::UserDeleted { occurred_at, .. }
            | AuthorityEvent::RoleAssignmentChanged { occurred_at, .. }
            | AuthorityEvent::PermissionGrantChanged { occurred_at, .. }
            | AuthorityEvent::RoleHierarchyChanged { occurred_at, .. }
            | AuthorityEvent::CatalogChanged { occurred_at, .. }
            | AuthorityEvent::SystemChanged { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Receives committed changes.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuthorityEvent);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn emit(&self, event: AuthorityEvent) {
        (**self).emit(event)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuthorityEvent) {}
}

/// Publishes onto an [`EventBus`].
#[derive(Debug)]
pub struct BusAuditSink<B> {
    bus: B,
}

impl<B> BusAuditSink<B>
where
    B: EventBus<AuthorityEvent>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> AuditSink for BusAuditSink<B>
where
    B: EventBus<AuthorityEvent>,
{
    fn emit(&self, event: AuthorityEvent) {
        let event_type = event.event_type();
        if let Err(error) = self.bus.publish(event) {
            tracing::warn!(event_type, ?error, "failed to publish authority event");
        }
    }
}

#[cfg(test)]
mod tests {
    use uniauth_events::InMemoryEventBus;

    use super::*;

    fn status_changed() -> AuthorityEvent {
        AuthorityEvent::StatusChanged {
            user_id: UserId::new(),
            action: LifecycleAction::Lock,
            old_status: UserStatus::Active,
            new_status: UserStatus::Locked,
            actor: Actor::new("admin"),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn bus_sink_publishes_to_subscribers() {
        let sink = BusAuditSink::new(Arc::new(InMemoryEventBus::new()));
        let sub = sink.bus().subscribe();

        sink.emit(status_changed());

        let received = sub.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type(), "uniauth.user.status_changed");
        assert_eq!(received[0].actor().as_str(), "admin");
    }

    #[test]
    fn payload_is_tagged_json() {
        let payload = status_changed().payload();
        assert_eq!(payload["type"], "status_changed");
        assert_eq!(payload["old_status"], "ACTIVE");
        assert_eq!(payload["new_status"], "LOCKED");
        assert_eq!(payload["action"], "LOCK");
    }

    #[test]
    fn flattened_changes_carry_their_tag() {
        let event = AuthorityEvent::PermissionGrantChanged {
            role_id: RoleId::new(),
            permission_id: PermissionId::new(),
            change: GrantChange::Granted { access_level: AccessLevel::Deny },
            actor: Actor::system(),
            occurred_at: Utc::now(),
        };
        let payload = event.payload();
        assert_eq!(payload["change"], "granted");
        assert_eq!(payload["access_level"], "DENY");
    }
}
