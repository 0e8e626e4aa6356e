//! Domain error model.

use thiserror::Error;

/// Result type used across the authority.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every failure the core can report is one of these variants. Errors are
/// synchronous and local: nothing in the core retries on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (system role deletion, tenant with live dependents).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation or a lost compare-and-swap.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A grant or parent link would cross a tenant boundary.
    #[error("scope mismatch: {0}")]
    ScopeMismatch(String),

    /// The role hierarchy would become cyclic.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A lifecycle action is not applicable to the current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Trust-gateway rejection. Carries no detail on purpose; callers log the reason.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn scope_mismatch(msg: impl Into<String>) -> Self {
        Self::ScopeMismatch(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::CycleDetected(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    /// Stable machine-readable kind, used in bulk reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::ScopeMismatch(_) => "scope_mismatch",
            DomainError::CycleDetected(_) => "cycle_detected",
            DomainError::InvalidTransition(_) => "invalid_transition",
            DomainError::Unauthorized => "unauthorized",
        }
    }
}
