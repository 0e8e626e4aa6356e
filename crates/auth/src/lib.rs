//! `uniauth-auth` — the identity and access-control authority.
//!
//! Tenants (registered systems) own permissions and roles; users hold roles;
//! the resolver answers "may user U do X"; the trust gateway authenticates
//! system-to-system calls. Storage sits behind [`store::AuthorityStore`] and
//! change notifications behind [`audit::AuditSink`]. No transport lives here.

pub mod actor;
pub mod audit;
pub mod authorize;
pub mod bulk;
pub mod catalog;
pub mod directory;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod resolver;
pub mod risk;
pub mod role_graph;
pub mod secrets;
pub mod store;
pub mod tenants;

#[cfg(test)]
mod testing;

pub use actor::Actor;
pub use audit::{AuditSink, AuthorityEvent, BusAuditSink, NoopAuditSink};
pub use authorize::{
    AuthorizationExplanation, AuthzError, PermissionRequirement, authorize, authorize_requirement,
    explain_authorization,
};
pub use bulk::BulkReport;
pub use catalog::PermissionCatalog;
pub use directory::{DirectoryPolicy, UserDirectory};
pub use gateway::TrustGateway;
pub use lifecycle::{LifecycleAction, LifecycleStateMachine, Transition, TransitionEffect, UserStatus};
pub use resolver::{AccessResolver, MAX_CACHE_TTL};
pub use risk::RiskLevel;
pub use role_graph::RoleGraph;
pub use secrets::{CredentialIssuer, SecretHasher, Sha256SecretHasher};
pub use store::{AuthorityStore, InMemoryAuthorityStore};
pub use tenants::TenantRegistry;
