//! Shared wiring for unit tests: every component on one in-memory store.

use std::sync::Arc;
use std::time::Duration;

use uniauth_core::RoleId;
use uniauth_events::{EventBus, InMemoryEventBus, Subscription};

use crate::actor::Actor;
use crate::audit::{AuthorityEvent, BusAuditSink};
use crate::catalog::PermissionCatalog;
use crate::directory::{DirectoryPolicy, UserDirectory};
use crate::gateway::TrustGateway;
use crate::model::{NewPermission, NewRole, NewSystem, NewUser, Permission, Role, System, User};
use crate::resolver::AccessResolver;
use crate::role_graph::RoleGraph;
use crate::secrets::{CredentialIssuer, Sha256SecretHasher};
use crate::store::{AuthorityStore, InMemoryAuthorityStore};
use crate::tenants::TenantRegistry;

pub(crate) struct Fixture {
    pub catalog: PermissionCatalog,
    pub registry: Arc<TenantRegistry>,
    pub graph: Arc<RoleGraph>,
    pub directory: Arc<UserDirectory>,
    pub resolver: AccessResolver,
    pub gateway: TrustGateway,
    pub admin: Actor,
    events: Subscription<AuthorityEvent>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(DirectoryPolicy::default(), Duration::from_secs(5))
    }

    pub fn with_policy(policy: DirectoryPolicy) -> Self {
        Self::build(policy, Duration::from_secs(5))
    }

    pub fn with_cache_ttl(ttl: Duration) -> Self {
        Self::build(DirectoryPolicy::default(), ttl)
    }

    fn build(policy: DirectoryPolicy, cache_ttl: Duration) -> Self {
        let store: Arc<dyn AuthorityStore> = Arc::new(InMemoryAuthorityStore::new());
        let bus: Arc<InMemoryEventBus<AuthorityEvent>> = Arc::new(InMemoryEventBus::new());
        let events: Subscription<AuthorityEvent> = bus.subscribe();
        let audit = Arc::new(BusAuditSink::new(bus));
        let issuer = CredentialIssuer::new(Arc::new(Sha256SecretHasher), chrono::Duration::days(180));

        let registry = Arc::new(TenantRegistry::new(store.clone(), audit.clone(), issuer));
        let graph = Arc::new(RoleGraph::new(store.clone(), audit.clone()));
        let directory = Arc::new(UserDirectory::new(store.clone(), audit.clone(), policy));
        Self {
            catalog: PermissionCatalog::new(store.clone(), audit),
            resolver: AccessResolver::new(store, graph.clone(), directory.clone(), cache_ttl),
            gateway: TrustGateway::new(registry.clone()),
            registry,
            graph,
            directory,
            admin: Actor::new("admin"),
            events,
        }
    }

    pub fn system(&self, code: &str) -> System {
        self.registry
            .register_system(NewSystem::new(code, format!("{code} system")), &self.admin)
            .unwrap()
            .0
    }

    pub fn permission(&self, system: &System, code: &str) -> Permission {
        let (resource, action) = code.rsplit_once('_').unwrap_or((code, "USE"));
        self.catalog
            .create_permission(system.id, NewPermission::new(code, code, resource, action), &self.admin)
            .unwrap()
    }

    pub fn role(&self, system: &System, code: &str, parent: Option<RoleId>) -> Role {
        let mut new = NewRole::new(system.id, code, code);
        new.parent_id = parent;
        self.graph.create_role(new, &self.admin).unwrap()
    }

    pub fn user(&self, username: &str) -> User {
        self.directory
            .create_user(NewUser::new(username, format!("{username}@example.com")), &self.admin)
            .unwrap()
    }

    /// Events emitted since the last call.
    pub fn events(&self) -> Vec<AuthorityEvent> {
        self.events.drain()
    }
}
