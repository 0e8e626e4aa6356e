use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uniauth_core::{DomainError, DomainResult, Entity, SystemId};

pub const DEFAULT_RATE_LIMIT: u32 = 1000;
const MAX_CODE_LEN: usize = 50;

/// A registered client system (the tenant).
///
/// `api_key` is the public key id and is stored in clear. Only the hash of the
/// secret is ever held; it is never serialized and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub base_url: Option<String>,
    pub is_active: bool,
    pub api_key: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub rate_limit: u32,
    pub keys_issued_at: DateTime<Utc>,
    pub keys_expire_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl System {
    pub fn keys_expired(&self, now: DateTime<Utc>) -> bool {
        self.keys_expire_at <= now
    }

    pub fn identity(&self) -> SystemIdentity {
        SystemIdentity {
            system_id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            rate_limit: self.rate_limit,
        }
    }
}

impl core::fmt::Debug for System {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("name", &self.name)
            .field("is_active", &self.is_active)
            .field("api_key", &self.api_key)
            .field("secret_hash", &"<redacted>")
            .field("rate_limit", &self.rate_limit)
            .field("keys_expire_at", &self.keys_expire_at)
            .finish_non_exhaustive()
    }
}

impl Entity for System {
    type Id = SystemId;

    fn id(&self) -> SystemId {
        self.id
    }
}

/// Verified caller identity returned by the trust gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemIdentity {
    pub system_id: SystemId,
    pub code: String,
    pub name: String,
    pub rate_limit: u32,
}

/// Freshly generated key material. The secret is only ever visible here.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub api_key: String,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl core::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSystem {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

impl NewSystem {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            base_url: None,
            rate_limit: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Codes are 1..=50 chars of ASCII alphanumerics, `_` or `-`.
    pub(crate) fn validate(&self) -> DomainResult<()> {
        validate_code(&self.code)?;
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("system name cannot be empty"));
        }
        if self.rate_limit == Some(0) {
            return Err(DomainError::validation("rate limit must be positive"));
        }
        Ok(())
    }
}

pub(crate) fn validate_code(code: &str) -> DomainResult<()> {
    if code.is_empty() || code.len() > MAX_CODE_LEN {
        return Err(DomainError::validation(format!(
            "system code must be 1..={MAX_CODE_LEN} characters"
        )));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(DomainError::validation(format!("system code '{code}' has invalid characters")));
    }
    Ok(())
}

/// Administrative update. `None` leaves a field untouched; the code never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_url: Option<String>,
    pub rate_limit: Option<u32>,
    pub is_active: Option<bool>,
}

impl SystemUpdate {
    pub(crate) fn apply_to(&self, system: &mut System) -> DomainResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("system name cannot be empty"));
            }
            system.name = name.clone();
        }
        if let Some(description) = &self.description {
            system.description = Some(description.clone());
        }
        if let Some(base_url) = &self.base_url {
            system.base_url = Some(base_url.clone());
        }
        if let Some(rate_limit) = self.rate_limit {
            if rate_limit == 0 {
                return Err(DomainError::validation("rate limit must be positive"));
            }
            system.rate_limit = rate_limit;
        }
        if let Some(active) = self.is_active {
            system.is_active = active;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub system_id: SystemId,
    pub roles: usize,
    pub permissions: usize,
    pub role_holders: usize,
    pub is_active: bool,
    pub keys_expired: bool,
}
