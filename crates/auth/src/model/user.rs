use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uniauth_core::{DomainError, DomainResult, Entity, RoleId, UserId};

use crate::actor::Actor;
use crate::lifecycle::{Transition, TransitionEffect, UserStatus};

/// A user identity.
///
/// `status` only moves through a lifecycle [`Transition`]; the store applies
/// it with a compare-and-swap on the previous status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub must_change_password: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Apply a resolved transition and its side effects.
    pub(crate) fn apply_transition(&mut self, transition: &Transition, locked_until: Option<DateTime<Utc>>) {
        self.status = transition.to;
        for effect in transition.effects {
            match effect {
                TransitionEffect::SetLocked => {
                    self.is_locked = true;
                    self.locked_until = locked_until;
                }
                TransitionEffect::ClearLock => {
                    self.is_locked = false;
                    self.locked_until = None;
                    self.failed_login_attempts = 0;
                }
                TransitionEffect::RequirePasswordChange => self.must_change_password = true,
                TransitionEffect::ClearPasswordChange => self.must_change_password = false,
            }
        }
    }

    pub fn login_decision(&self, now: DateTime<Utc>) -> LoginDecision {
        if !self.status.can_login() {
            return LoginDecision::Denied(LoginDenial::StatusForbidsLogin(self.status));
        }
        match self.locked_until {
            Some(until) if until > now => LoginDecision::Denied(LoginDenial::LockedUntil(until)),
            _ => LoginDecision::Allowed {
                must_change_password: self.must_change_password,
            },
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            full_name: None,
            status: UserStatus::Active,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Initial status (e.g. `Invited`, `Pending`). Later changes go through the lifecycle.
    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn into_user(self, now: DateTime<Utc>) -> DomainResult<User> {
        let username = self.username.trim().to_string();
        if username.is_empty() {
            return Err(DomainError::validation("username cannot be empty"));
        }
        Ok(User {
            id: UserId::new(),
            username,
            email: normalize_email(&self.email)?,
            full_name: self.full_name,
            phone: None,
            avatar_url: None,
            status: self.status,
            is_locked: self.status == UserStatus::Locked,
            locked_until: None,
            failed_login_attempts: 0,
            must_change_password: self.status == UserStatus::PasswordResetRequired,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Lowercased and trimmed; exactly one `@` with text on both sides.
pub(crate) fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(email),
        _ => Err(DomainError::validation(format!("'{email}' is not a valid email address"))),
    }
}

/// Profile edit. `None` leaves a field untouched. Username and status are
/// not editable here; status only moves through the lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Normalizes and validates before touching `user`, so a rejected update leaves it as it was.
    pub(crate) fn apply_to(&self, user: &mut User, now: DateTime<Utc>) -> DomainResult<()> {
        let email = self.email.as_deref().map(normalize_email).transpose()?;
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(full_name) = &self.full_name {
            user.full_name = Some(full_name.trim().to_string()).filter(|n| !n.is_empty());
        }
        if let Some(phone) = &self.phone {
            user.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.trim().to_string()).filter(|a| !a.is_empty());
        }
        user.updated_at = now;
        Ok(())
    }
}

/// Filters for [`crate::UserDirectory::search_users`]. Every populated field
/// must match; an empty criteria matches everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSearchCriteria {
    /// Case-insensitive substring of username, email or full name.
    #[serde(default)]
    pub keyword: Option<String>,
    /// User holds an active role in at least one of these systems.
    #[serde(default)]
    pub system_codes: Vec<String>,
    /// User holds at least one of these roles (active assignments only).
    #[serde(default)]
    pub role_codes: Vec<String>,
    /// `true` matches only `ACTIVE` users, `false` everyone else.
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_to: Option<DateTime<Utc>>,
}

impl UserSearchCriteria {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Self::default()
        }
    }

    /// The filters that need only the user row; role and system filters are
    /// applied by the directory.
    pub(crate) fn matches_profile(&self, user: &User) -> bool {
        if let Some(keyword) = self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let keyword = keyword.to_lowercase();
            let hit = user.username.to_lowercase().contains(&keyword)
                || user.email.contains(&keyword)
                || user
                    .full_name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&keyword));
            if !hit {
                return false;
            }
        }
        if self.is_active.is_some_and(|active| (user.status == UserStatus::Active) != active) {
            return false;
        }
        if self.created_from.is_some_and(|from| user.created_at < from) {
            return false;
        }
        !self.created_to.is_some_and(|to| user.created_at > to)
    }
}

/// Join row: a user's (optionally time-bounded) hold on a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Actor,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_temporary: bool,
}

impl UserRoleAssignment {
    pub fn new(user_id: UserId, role_id: RoleId, expires_at: Option<DateTime<Utc>>, actor: Actor, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role_id,
            assigned_at: now,
            assigned_by: actor,
            expires_at,
            is_temporary: expires_at.is_some(),
        }
    }

    /// Expired once `expires_at` is strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Outcome of a login pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LoginDecision {
    Allowed { must_change_password: bool },
    Denied(LoginDenial),
}

impl LoginDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginDenial {
    StatusForbidsLogin(UserStatus),
    LockedUntil(DateTime<Utc>),
}
