//! System-to-system trust: API key/secret validation and key rotation.
//!
//! Every rejection surfaces as the same `Unauthorized` so a caller cannot
//! tell an inactive system from a wrong secret. The reason is logged.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use uniauth_core::{DomainError, DomainResult, SystemId};

use crate::actor::Actor;
use crate::model::{IssuedCredentials, System, SystemIdentity};
use crate::tenants::TenantRegistry;

pub struct TrustGateway {
    registry: Arc<TenantRegistry>,
}

impl TrustGateway {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self { registry }
    }

    /// Validates a call from `system_code` presenting `secret`.
    ///
    /// `NotFound` for an unknown code; `Unauthorized` for an inactive system,
    /// expired keys or a secret that does not verify.
    pub fn validate(&self, system_code: &str, secret: &str) -> DomainResult<SystemIdentity> {
        let system = self
            .registry
            .find_system_by_code(system_code)?
            .ok_or_else(|| DomainError::not_found(format!("system '{system_code}'")))?;
        self.check(&system, secret)
    }

    pub fn validate_access(&self, system_code: &str, secret: &str) -> bool {
        self.validate(system_code, secret).is_ok()
    }

    /// Validates by public api key instead of system code. An unknown key is
    /// `Unauthorized`, not `NotFound`.
    pub fn authenticate(&self, api_key: &str, secret: &str) -> DomainResult<SystemIdentity> {
        let Some(system) = self.registry.find_system_by_api_key(api_key)? else {
            warn!("rejected call: unknown api key");
            return Err(DomainError::Unauthorized);
        };
        self.check(&system, secret)
    }

    fn check(&self, system: &System, secret: &str) -> DomainResult<SystemIdentity> {
        if !system.is_active {
            warn!(system = %system.code, "rejected call: system inactive");
            return Err(DomainError::Unauthorized);
        }
        if system.keys_expired(Utc::now()) {
            warn!(system = %system.code, expired_at = %system.keys_expire_at, "rejected call: keys expired");
            return Err(DomainError::Unauthorized);
        }
        if !self.registry.hasher().verify(secret, &system.secret_hash) {
            warn!(system = %system.code, "rejected call: secret mismatch");
            return Err(DomainError::Unauthorized);
        }
        Ok(system.identity())
    }

    /// Issues a fresh key pair. The old pair stops working immediately and
    /// the new secret is returned exactly once.
    pub fn regenerate_keys(&self, system_id: SystemId, actor: &Actor) -> DomainResult<IssuedCredentials> {
        let (system, credentials) = self.registry.rotate_credentials(system_id, actor)?;
        warn!(
            system = %system.code,
            api_key = %system.api_key,
            expires_at = %credentials.expires_at,
            actor = %actor,
            "system keys regenerated"
        );
        Ok(credentials)
    }

    /// Expires the current keys without issuing new ones.
    pub fn revoke_keys(&self, system_id: SystemId, actor: &Actor) -> DomainResult<()> {
        let system = self.registry.expire_credentials(system_id, actor)?;
        info!(system = %system.code, actor = %actor, "system keys revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewSystem;
    use crate::testing::Fixture;

    fn registered(fx: &Fixture) -> (System, IssuedCredentials) {
        fx.registry
            .register_system(NewSystem::new("CRM", "Customer relations"), &fx.admin)
            .unwrap()
    }

    #[test]
    fn valid_secret_yields_identity() {
        let fx = Fixture::new();
        let (system, creds) = registered(&fx);

        let identity = fx.gateway.validate("CRM", &creds.secret).unwrap();

        assert_eq!(identity.system_id, system.id);
        assert_eq!(identity.rate_limit, 1000);
        assert_eq!(fx.gateway.authenticate(&creds.api_key, &creds.secret).unwrap(), identity);
    }

    #[test]
    fn wrong_secret_and_unknown_code() {
        let fx = Fixture::new();
        let (_, creds) = registered(&fx);

        assert_eq!(fx.gateway.validate("CRM", "wrong").unwrap_err(), DomainError::Unauthorized);
        assert!(!fx.gateway.validate_access("CRM", "wrong"));
        assert!(matches!(fx.gateway.validate("ERP", &creds.secret).unwrap_err(), DomainError::NotFound(_)));
        assert_eq!(fx.gateway.authenticate("UA-NOPE", &creds.secret).unwrap_err(), DomainError::Unauthorized);
    }

    #[test]
    fn inactive_system_is_unauthorized_even_with_the_right_secret() {
        let fx = Fixture::new();
        let (system, creds) = registered(&fx);
        fx.registry.deactivate_system(system.id, &fx.admin).unwrap();

        assert_eq!(fx.gateway.validate("CRM", &creds.secret).unwrap_err(), DomainError::Unauthorized);
    }

    #[test]
    fn regeneration_invalidates_the_old_secret() {
        let fx = Fixture::new();
        let (system, old) = registered(&fx);

        let new = fx.gateway.regenerate_keys(system.id, &fx.admin).unwrap();

        assert_ne!(old.api_key, new.api_key);
        assert!(!fx.gateway.validate_access("CRM", &old.secret));
        assert!(fx.gateway.validate_access("CRM", &new.secret));
        let stored = fx.registry.get_system(system.id).unwrap();
        assert_ne!(stored.secret_hash, new.secret);
    }

    #[test]
    fn revoked_keys_stop_working() {
        let fx = Fixture::new();
        let (system, creds) = registered(&fx);

        fx.gateway.revoke_keys(system.id, &fx.admin).unwrap();

        assert_eq!(fx.gateway.validate("CRM", &creds.secret).unwrap_err(), DomainError::Unauthorized);
    }
}
