//! Component wiring: one store, one audit sink, every service built on them.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use uniauth_auth::{
    AccessResolver, AuditSink, AuthorityEvent, AuthorityStore, BusAuditSink, CredentialIssuer, InMemoryAuthorityStore,
    PermissionCatalog, RoleGraph, Sha256SecretHasher, TenantRegistry, TrustGateway, UserDirectory,
};
use uniauth_events::InMemoryEventBus;

use crate::config::{AuthorityConfig, ConfigError};
use crate::jobs::{ExpirySweeper, SweeperConfig, SweeperHandle};

/// A fully wired authority.
///
/// Services share the store and the audit sink; cloning an `Authority` is
/// cheap and yields handles to the same state.
#[derive(Clone)]
pub struct Authority {
    config: AuthorityConfig,
    store: Arc<dyn AuthorityStore>,
    pub registry: Arc<TenantRegistry>,
    pub catalog: Arc<PermissionCatalog>,
    pub graph: Arc<RoleGraph>,
    pub directory: Arc<UserDirectory>,
    pub resolver: Arc<AccessResolver>,
    pub gateway: Arc<TrustGateway>,
}

impl Authority {
    /// Wires every service over `store`, publishing changes to `audit`.
    pub fn with_store(
        store: Arc<dyn AuthorityStore>,
        audit: Arc<dyn AuditSink>,
        config: AuthorityConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let issuer = CredentialIssuer::new(Arc::new(Sha256SecretHasher), config.key_ttl());
        let registry = Arc::new(TenantRegistry::new(store.clone(), audit.clone(), issuer));
        let catalog = Arc::new(PermissionCatalog::new(store.clone(), audit.clone()));
        let graph = Arc::new(RoleGraph::new(store.clone(), audit.clone()));
        let directory = Arc::new(UserDirectory::new(store.clone(), audit, config.directory_policy()));
        let resolver = Arc::new(AccessResolver::new(
            store.clone(),
            graph.clone(),
            directory.clone(),
            config.cache_ttl(),
        ));
        let gateway = Arc::new(TrustGateway::new(registry.clone()));

        info!(
            cache_ttl_ms = config.cache_ttl_ms,
            strict_transitions = config.strict_transitions,
            max_failed_logins = config.max_failed_logins,
            "authority wired"
        );

        Ok(Self {
            config,
            store,
            registry,
            catalog,
            graph,
            directory,
            resolver,
            gateway,
        })
    }

    /// In-memory store publishing onto `bus`. Subscribe before wiring to
    /// observe every event.
    pub fn in_memory_with_bus(
        config: AuthorityConfig,
        bus: Arc<InMemoryEventBus<AuthorityEvent>>,
    ) -> Result<Self, ConfigError> {
        let store: Arc<dyn AuthorityStore> = Arc::new(InMemoryAuthorityStore::new());
        Self::with_store(store, Arc::new(BusAuditSink::new(bus)), config)
    }

    pub fn in_memory(config: AuthorityConfig) -> Result<Self, ConfigError> {
        Self::in_memory_with_bus(config, Arc::new(InMemoryEventBus::new()))
    }

    /// Process bootstrap: configuration from the environment, tracing,
    /// then an in-memory authority.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = AuthorityConfig::from_env().context("loading authority configuration")?;
        uniauth_observability::init(config.log_format);
        Self::in_memory(config).context("wiring authority")
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AuthorityStore> {
        &self.store
    }

    /// Starts the background sweeper for expired role assignments.
    pub fn spawn_expiry_sweeper(&self) -> std::io::Result<SweeperHandle> {
        ExpirySweeper::new(self.directory.clone(), self.resolver.clone())
            .spawn(SweeperConfig::default().with_interval(self.config.sweep_interval()))
    }
}
