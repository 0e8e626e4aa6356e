use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use uniauth_core::{DomainError, DomainResult, UserId};

use crate::lifecycle::UserStatus;
use crate::resolver::AccessResolver;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("login not permitted in status {0}")]
    LoginNotPermitted(UserStatus),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Operation-side authorization contract.
///
/// Implement this on operations that require permissions; callers enforce
/// them through [`authorize_requirement`] before executing.
pub trait PermissionRequirement {
    fn required_permissions(&self) -> &[&str];
}

/// The single decision point for "may this user do X".
///
/// There is no wildcard permission: every code must be granted explicitly.
pub fn authorize(resolver: &AccessResolver, user_id: UserId, code: &str) -> Result<(), AuthzError> {
    let user = resolver.directory().get_user(user_id)?;
    if !user.status.can_login() {
        return Err(AuthzError::LoginNotPermitted(user.status));
    }
    if resolver.has_permission(user_id, code)? {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(code.to_string()))
    }
}

/// Every permission of `requirement` must be held.
pub fn authorize_requirement<R>(resolver: &AccessResolver, user_id: UserId, requirement: &R) -> Result<(), AuthzError>
where
    R: PermissionRequirement + ?Sized,
{
    for code in requirement.required_permissions() {
        authorize(resolver, user_id, code)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub reason: String,
    pub user: UserState,
    /// Active roles whose effective set contains the permission.
    pub granting_roles: Vec<String>,
    /// Active roles carrying an explicit DENY for the permission.
    pub denying_roles: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserState {
    pub user_id: UserId,
    pub status: UserStatus,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    LoginNotPermitted,
    ExplicitlyDenied,
    MissingPermission,
}

/// Explain why `authorize` would allow or deny `code` for `user_id` at `now`.
///
/// Resolves without the permission cache, so the report reflects the store
/// exactly.
pub fn explain_authorization(
    resolver: &AccessResolver,
    user_id: UserId,
    code: &str,
    now: DateTime<Utc>,
) -> DomainResult<AuthorizationExplanation> {
    let user = resolver.directory().get_user(user_id)?;
    let graph = resolver.graph();

    let mut roles = Vec::new();
    let mut granting_roles = Vec::new();
    let mut denying_roles = Vec::new();
    for assignment in resolver.directory().active_assignments(user_id, now)? {
        let Ok(role) = graph.get_role(assignment.role_id) else {
            continue;
        };
        if graph.effective_permissions(role.id)?.contains(code) {
            granting_roles.push(role.code.clone());
        }
        if graph.denied_permissions(role.id)?.contains(code) {
            denying_roles.push(role.code.clone());
        }
        roles.push(role.code);
    }
    roles.sort();

    let effective = resolver.user_effective_permissions_at(user_id, now)?;
    let has_required = effective.contains(code);
    let state = UserState {
        user_id,
        status: user.status,
        roles,
        effective_permissions: effective.codes().into_iter().collect(),
    };

    let denial_reason = if !user.status.can_login() {
        Some(DenialReason {
            kind: DenialKind::LoginNotPermitted,
            message: format!("User status {} does not permit login", user.status),
            suggestions: vec![format!(
                "Apply a lifecycle action that moves the user out of {} (e.g. ACTIVATE, UNLOCK, UNSUSPEND)",
                user.status
            )],
        })
    } else if has_required {
        None
    } else if !denying_roles.is_empty() {
        Some(DenialReason {
            kind: DenialKind::ExplicitlyDenied,
            message: format!("Permission '{code}' is explicitly denied by {denying_roles:?}"),
            suggestions: vec![
                format!("Revoke the DENY grant of '{code}' from {denying_roles:?}"),
                format!("Assign another role that allows '{code}'"),
            ],
        })
    } else {
        Some(DenialReason {
            kind: DenialKind::MissingPermission,
            message: format!("No active role grants '{code}'"),
            suggestions: vec![
                format!("Assign a role that grants the '{code}' permission"),
                format!("Grant '{code}' to one of the user's roles or an ancestor of it"),
            ],
        })
    };

    let granted = denial_reason.is_none();
    let reason = match &denial_reason {
        None => format!("Permission '{code}' granted by {granting_roles:?}"),
        Some(d) => d.message.clone(),
    };

    Ok(AuthorizationExplanation {
        required_permission: code.to_string(),
        granted,
        reason,
        user: state,
        granting_roles,
        denying_roles,
        denial_reason,
    })
}
