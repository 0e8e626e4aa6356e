//! Account lifecycle: user statuses, administrative actions, and the single
//! transition table that maps one to the other.
//!
//! Everything here is pure. Persistence of a transition (compare-and-swap on
//! the expected status) lives in [`crate::directory::UserDirectory`].

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use uniauth_core::{DomainError, DomainResult};

use crate::risk::RiskLevel;

// ─────────────────────────────────────────────────────────────────────────────
// User Status
// ─────────────────────────────────────────────────────────────────────────────

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Pending,
    Suspended,
    Locked,
    Deleted,
    Expired,
    Archived,
    Disabled,
    Invited,
    VerificationPending,
    PasswordResetRequired,
    FirstLogin,
    Compromised,
    Quarantine,
}

impl UserStatus {
    pub const ALL: [UserStatus; 15] = [
        UserStatus::Active,
        UserStatus::Inactive,
        UserStatus::Pending,
        UserStatus::Suspended,
        UserStatus::Locked,
        UserStatus::Deleted,
        UserStatus::Expired,
        UserStatus::Archived,
        UserStatus::Disabled,
        UserStatus::Invited,
        UserStatus::VerificationPending,
        UserStatus::PasswordResetRequired,
        UserStatus::FirstLogin,
        UserStatus::Compromised,
        UserStatus::Quarantine,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Pending => "PENDING",
            UserStatus::Suspended => "SUSPENDED",
            UserStatus::Locked => "LOCKED",
            UserStatus::Deleted => "DELETED",
            UserStatus::Expired => "EXPIRED",
            UserStatus::Archived => "ARCHIVED",
            UserStatus::Disabled => "DISABLED",
            UserStatus::Invited => "INVITED",
            UserStatus::VerificationPending => "VERIFICATION_PENDING",
            UserStatus::PasswordResetRequired => "PASSWORD_RESET_REQUIRED",
            UserStatus::FirstLogin => "FIRST_LOGIN",
            UserStatus::Compromised => "COMPROMISED",
            UserStatus::Quarantine => "QUARANTINE",
        }
    }

    /// Whether a user in this status may authenticate at all.
    pub fn can_login(self) -> bool {
        matches!(
            self,
            UserStatus::Active | UserStatus::PasswordResetRequired | UserStatus::FirstLogin
        )
    }

    pub fn is_active(self) -> bool {
        self == UserStatus::Active
    }

    pub fn is_locked(self) -> bool {
        matches!(self, UserStatus::Locked | UserStatus::Suspended)
    }

    /// Statuses waiting on the user or an administrator to do something.
    pub fn requires_action(self) -> bool {
        matches!(
            self,
            UserStatus::Pending
                | UserStatus::VerificationPending
                | UserStatus::PasswordResetRequired
                | UserStatus::Invited
                | UserStatus::FirstLogin
        )
    }

    /// Case-insensitive parse; anything unrecognised maps to `Inactive`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(UserStatus::Inactive)
    }
}

impl FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        UserStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown user status '{s}'")))
    }
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Actions
// ─────────────────────────────────────────────────────────────────────────────

/// Administrative operation that moves a user between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleAction {
    Approve,
    Reject,
    Verify,
    Activate,
    Deactivate,
    Lock,
    Unlock,
    Suspend,
    Unsuspend,
    Reactivate,
    Archive,
    Restore,
    ForcePasswordReset,
    ResetPassword,
}

impl LifecycleAction {
    pub const ALL: [LifecycleAction; 14] = [
        LifecycleAction::Approve,
        LifecycleAction::Reject,
        LifecycleAction::Verify,
        LifecycleAction::Activate,
        LifecycleAction::Deactivate,
        LifecycleAction::Lock,
        LifecycleAction::Unlock,
        LifecycleAction::Suspend,
        LifecycleAction::Unsuspend,
        LifecycleAction::Reactivate,
        LifecycleAction::Archive,
        LifecycleAction::Restore,
        LifecycleAction::ForcePasswordReset,
        LifecycleAction::ResetPassword,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Approve => "APPROVE",
            LifecycleAction::Reject => "REJECT",
            LifecycleAction::Verify => "VERIFY",
            LifecycleAction::Activate => "ACTIVATE",
            LifecycleAction::Deactivate => "DEACTIVATE",
            LifecycleAction::Lock => "LOCK",
            LifecycleAction::Unlock => "UNLOCK",
            LifecycleAction::Suspend => "SUSPEND",
            LifecycleAction::Unsuspend => "UNSUSPEND",
            LifecycleAction::Reactivate => "REACTIVATE",
            LifecycleAction::Archive => "ARCHIVE",
            LifecycleAction::Restore => "RESTORE",
            LifecycleAction::ForcePasswordReset => "FORCE_PASSWORD_RESET",
            LifecycleAction::ResetPassword => "RESET_PASSWORD",
        }
    }

    pub fn risk_level(self) -> RiskLevel {
        match self {
            LifecycleAction::Lock | LifecycleAction::Unlock | LifecycleAction::ForcePasswordReset => {
                RiskLevel::High
            }
            LifecycleAction::Approve
            | LifecycleAction::Reject
            | LifecycleAction::Verify
            | LifecycleAction::Reactivate
            | LifecycleAction::ResetPassword => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl FromStr for LifecycleAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        LifecycleAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown lifecycle action '{s}'")))
    }
}

impl core::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transition Table
// ─────────────────────────────────────────────────────────────────────────────

/// Side effect on the user record that accompanies a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEffect {
    /// Set `is_locked` (and `locked_until` when the caller supplies one).
    SetLocked,
    /// Clear `is_locked`, `locked_until` and `failed_login_attempts`.
    ClearLock,
    /// Set `must_change_password`.
    RequirePasswordChange,
    /// Clear `must_change_password`.
    ClearPasswordChange,
}

/// A resolved, applicable transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: LifecycleAction,
    pub from: UserStatus,
    pub to: UserStatus,
    pub effects: &'static [TransitionEffect],
}

#[derive(Clone, Copy)]
enum Sources {
    Only(&'static [UserStatus]),
    AllExcept(&'static [UserStatus]),
}

impl Sources {
    fn admits(&self, status: UserStatus) -> bool {
        match self {
            Sources::Only(list) => list.contains(&status),
            Sources::AllExcept(list) => !list.contains(&status),
        }
    }
}

#[derive(Clone, Copy)]
struct Rule {
    sources: Sources,
    target: UserStatus,
    effects: &'static [TransitionEffect],
}

impl Rule {
    const fn plain(sources: Sources, target: UserStatus) -> Self {
        Self { sources, target, effects: &[] }
    }
}

use LifecycleAction as A;
use UserStatus as S;

/// Pure lifecycle state machine over a fixed per-action transition table.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    /// One row per action. Adding a [`LifecycleAction`] without a row fails to compile.
    const fn rule(action: LifecycleAction) -> Rule {
        match action {
            A::Approve => Rule::plain(Sources::Only(&[S::Pending, S::Invited]), S::Active),
            A::Reject => Rule::plain(Sources::Only(&[S::Pending, S::Invited]), S::Inactive),
            A::Verify => Rule::plain(Sources::Only(&[S::VerificationPending]), S::Active),
            A::Activate => Rule::plain(Sources::Only(&[S::Inactive, S::Suspended]), S::Active),
            A::Deactivate => Rule::plain(Sources::Only(&[S::Active]), S::Inactive),
            A::Lock => Rule {
                sources: Sources::Only(&[S::Active, S::PasswordResetRequired]),
                target: S::Locked,
                effects: &[TransitionEffect::SetLocked],
            },
            A::Unlock => Rule {
                sources: Sources::Only(&[S::Locked]),
                target: S::Active,
                effects: &[TransitionEffect::ClearLock],
            },
            A::Suspend => Rule::plain(Sources::Only(&[S::Active]), S::Suspended),
            A::Unsuspend => Rule::plain(Sources::Only(&[S::Suspended]), S::Active),
            A::Reactivate => Rule::plain(Sources::Only(&[S::Suspended, S::Expired]), S::Active),
            A::Archive => Rule::plain(Sources::AllExcept(&[S::Deleted, S::Archived]), S::Archived),
            A::Restore => Rule::plain(Sources::Only(&[S::Archived, S::Deleted]), S::Active),
            A::ForcePasswordReset => Rule {
                sources: Sources::Only(&[S::Active, S::PasswordResetRequired]),
                target: S::PasswordResetRequired,
                effects: &[TransitionEffect::RequirePasswordChange],
            },
            A::ResetPassword => Rule {
                sources: Sources::Only(&[S::PasswordResetRequired]),
                target: S::Active,
                effects: &[TransitionEffect::ClearPasswordChange],
            },
        }
    }

    pub fn can_login(status: UserStatus) -> bool {
        status.can_login()
    }

    pub fn can_apply(status: UserStatus, action: LifecycleAction) -> bool {
        Self::rule(action).sources.admits(status)
    }

    /// Total: inapplicable pairs return `status` unchanged.
    pub fn apply(status: UserStatus, action: LifecycleAction) -> UserStatus {
        Self::try_apply(status, action).unwrap_or(status)
    }

    /// Strict: inapplicable pairs fail with `InvalidTransition`.
    pub fn try_apply(status: UserStatus, action: LifecycleAction) -> DomainResult<UserStatus> {
        Self::transition(status, action).map(|t| t.to)
    }

    pub fn transition(status: UserStatus, action: LifecycleAction) -> DomainResult<Transition> {
        let rule = Self::rule(action);
        if !rule.sources.admits(status) {
            return Err(DomainError::invalid_transition(format!(
                "{action} is not applicable to {status}"
            )));
        }
        Ok(Transition {
            action,
            from: status,
            to: rule.target,
            effects: rule.effects,
        })
    }

    pub fn allowed_actions(status: UserStatus) -> Vec<LifecycleAction> {
        LifecycleAction::ALL
            .into_iter()
            .filter(|a| Self::can_apply(status, *a))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
