use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use uniauth_core::UserId;

/// Who performed a mutation.
///
/// Threaded explicitly through every mutating call and recorded on join rows
/// (`assigned_by`) and audit events. Opaque at this layer: an administrator's
/// username, a service name, or `system` for automated transitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(Cow<'static, str>);

impl Actor {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The authority itself (expiry sweeps, automatic lockouts).
    pub fn system() -> Self {
        Self::new("system")
    }

    /// An actor identified by a user id.
    pub fn user(user_id: UserId) -> Self {
        Self::new(format!("user:{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
