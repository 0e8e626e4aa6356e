//! End-to-end scenarios against a fully wired in-memory authority.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use uniauth_auth::model::{AccessLevel, IssuedCredentials, NewPermission, NewRole, NewSystem, NewUser, Role, System};
use uniauth_auth::{Actor, AuthorityEvent, LifecycleAction, UserStatus};
use uniauth_core::{DomainError, RoleId, UserId};
use uniauth_events::{EventBus, InMemoryEventBus, Subscription};
use uniauth_infra::{Authority, AuthorityConfig};

fn admin() -> Actor {
    Actor::new("admin")
}

/// Uncached, so every check observes the latest grants.
fn authority() -> Authority {
    let config = AuthorityConfig {
        cache_ttl_ms: 0,
        ..AuthorityConfig::default()
    };
    Authority::in_memory(config).unwrap()
}

fn register(authority: &Authority, code: &str) -> (System, IssuedCredentials) {
    authority
        .registry
        .register_system(NewSystem::new(code, format!("{code} system")), &admin())
        .unwrap()
}

fn role(authority: &Authority, system: &System, code: &str) -> Role {
    authority.graph.create_role(NewRole::new(system.id, code, code), &admin()).unwrap()
}

fn grant(authority: &Authority, role: &Role, system: &System, code: &str, level: AccessLevel) {
    let permission = match authority.catalog.find_permission_by_code(code).unwrap() {
        Some(p) => p,
        None => {
            let (resource, action) = code.rsplit_once('_').unwrap();
            authority
                .catalog
                .create_permission(system.id, NewPermission::new(code, code, resource, action), &admin())
                .unwrap()
        }
    };
    authority.graph.assign_permission(role.id, permission.id, level, &admin()).unwrap();
}

fn user(authority: &Authority, name: &str) -> UserId {
    authority
        .directory
        .create_user(NewUser::new(name, format!("{name}@example.com")), &admin())
        .unwrap()
        .id
}

struct Hrm {
    authority: Authority,
    hrm: System,
    credentials: IssuedCredentials,
    hrm_admin: Role,
    alice: UserId,
}

/// HRM owns HRM_USER_READ, granted ALLOW to HRM_ADMIN, which alice holds.
fn hrm() -> Hrm {
    let authority = authority();
    let (hrm, credentials) = register(&authority, "HRM");
    let hrm_admin = role(&authority, &hrm, "HRM_ADMIN");
    grant(&authority, &hrm_admin, &hrm, "HRM_USER_READ", AccessLevel::Allow);
    let alice = user(&authority, "alice");
    authority.directory.assign_role(alice, hrm_admin.id, None, &admin()).unwrap();
    Hrm {
        authority,
        hrm,
        credentials,
        hrm_admin,
        alice,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn alice_reads_users_through_her_admin_role() {
    let Hrm { authority, alice, .. } = hrm();

    assert!(authority.resolver.has_permission(alice, "HRM_USER_READ").unwrap());
    assert!(!authority.resolver.has_permission(alice, "HRM_USER_DELETE").unwrap());
    assert!(uniauth_auth::authorize(&authority.resolver, alice, "HRM_USER_READ").is_ok());
}

#[test]
fn lock_gates_permissions_and_unlock_restores_them() {
    let Hrm { authority, alice, .. } = hrm();
    let directory = &authority.directory;
    directory.record_login_failure(alice, Utc::now()).unwrap();
    directory.record_login_failure(alice, Utc::now()).unwrap();

    let locked = directory.change_status(alice, LifecycleAction::Lock, &admin()).unwrap();
    assert_eq!(locked.status, UserStatus::Locked);
    assert!(!authority.resolver.has_permission(alice, "HRM_USER_READ").unwrap());

    let unlocked = directory.change_status(alice, LifecycleAction::Unlock, &admin()).unwrap();
    assert_eq!(unlocked.status, UserStatus::Active);
    assert_eq!(unlocked.failed_login_attempts, 0);
    assert!(authority.resolver.has_permission(alice, "HRM_USER_READ").unwrap());
}

#[test]
fn repeated_login_failures_lock_the_account() {
    let Hrm { authority, alice, .. } = hrm();
    let now = Utc::now();

    for _ in 0..authority.config().max_failed_logins {
        authority.directory.record_login_failure(alice, now).unwrap();
    }

    let user = authority.directory.get_user(alice).unwrap();
    assert_eq!(user.status, UserStatus::Locked);
    assert!(user.locked_until.is_some_and(|until| until > now));
    assert!(!authority.resolver.has_any(alice, &["HRM_USER_READ"]).unwrap());
}

#[test]
fn inherited_grant_is_cancelled_only_by_the_declaring_role() {
    let Hrm { authority, hrm, hrm_admin, .. } = hrm();
    grant(&authority, &hrm_admin, &hrm, "HRM_SALARY_READ", AccessLevel::Allow);
    let mut new = NewRole::new(hrm.id, "HRM_INTERN", "Intern");
    new.parent_id = Some(hrm_admin.id);
    let intern = authority.graph.create_role(new, &admin()).unwrap();
    grant(&authority, &intern, &hrm, "HRM_SALARY_READ", AccessLevel::Deny);

    let bob = user(&authority, "bob");
    authority.directory.assign_role(bob, intern.id, None, &admin()).unwrap();
    assert!(authority.resolver.has_permission(bob, "HRM_USER_READ").unwrap());
    assert!(!authority.resolver.has_permission(bob, "HRM_SALARY_READ").unwrap());

    // Another held role that allows the permission wins over the intern DENY.
    authority.directory.assign_role(bob, hrm_admin.id, None, &admin()).unwrap();
    assert!(authority.resolver.has_permission(bob, "HRM_SALARY_READ").unwrap());
}

#[test]
fn expired_assignment_stops_granting_before_any_sweep() {
    let Hrm { authority, hrm_admin, .. } = hrm();
    let carol = user(&authority, "carol");
    let expiry = Utc::now() + Duration::minutes(10);
    authority.directory.assign_role(carol, hrm_admin.id, Some(expiry), &admin()).unwrap();

    let before = authority.resolver.user_effective_permissions_at(carol, Utc::now()).unwrap();
    let after = authority
        .resolver
        .user_effective_permissions_at(carol, expiry + Duration::seconds(1))
        .unwrap();

    assert!(before.contains("HRM_USER_READ"));
    assert!(after.is_empty());
}

#[test]
fn permissions_are_scoped_to_the_calling_system() {
    let Hrm {
        authority,
        hrm,
        credentials,
        alice,
        ..
    } = hrm();
    let (crm, crm_credentials) = register(&authority, "CRM");
    let sales = role(&authority, &crm, "CRM_SALES");
    grant(&authority, &sales, &crm, "CRM_LEAD_READ", AccessLevel::Allow);
    authority.directory.assign_role(alice, sales.id, None, &admin()).unwrap();

    let as_hrm = authority.gateway.validate("HRM", &credentials.secret).unwrap();
    let as_crm = authority.gateway.authenticate(&crm_credentials.api_key, &crm_credentials.secret).unwrap();

    let hrm_view = authority.resolver.permissions_for_caller(&as_hrm, alice).unwrap();
    let crm_view = authority.resolver.permissions_for_caller(&as_crm, alice).unwrap();
    assert_eq!(hrm_view.codes().into_iter().collect::<Vec<_>>(), vec!["HRM_USER_READ"]);
    assert_eq!(crm_view.codes().into_iter().collect::<Vec<_>>(), vec!["CRM_LEAD_READ"]);
    assert!(hrm_view.iter().all(|p| p.system_id == hrm.id));
}

// ─────────────────────────────────────────────────────────────────────────────
// Hierarchy
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reparenting_a_root_under_its_child_is_a_cycle() {
    let authority = authority();
    let (hrm, _) = register(&authority, "HRM");
    let a = role(&authority, &hrm, "A");
    let mut new_b = NewRole::new(hrm.id, "B", "B");
    new_b.parent_id = Some(a.id);
    let b = authority.graph.create_role(new_b, &admin()).unwrap();

    let err = authority.graph.set_parent(a.id, Some(b.id), &admin()).unwrap_err();

    assert!(matches!(err, DomainError::CycleDetected(_)));
    assert_eq!(authority.graph.get_role(a.id).unwrap().parent_id, None);
    assert_eq!(authority.graph.get_role(b.id).unwrap().parent_id, Some(a.id));
}

#[test]
fn concurrent_reparenting_never_produces_a_cycle() {
    for _ in 0..25 {
        let authority = authority();
        let (hrm, _) = register(&authority, "HRM");
        let a = role(&authority, &hrm, "A");
        let b = role(&authority, &hrm, "B");
        let barrier = Arc::new(Barrier::new(2));

        let attempts: Vec<(RoleId, RoleId)> = vec![(a.id, b.id), (b.id, a.id)];
        let handles: Vec<_> = attempts
            .into_iter()
            .map(|(child, parent)| {
                let graph = authority.graph.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    graph.set_parent(child, Some(parent), &Actor::new("admin")).is_ok()
                })
            })
            .collect();
        let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

        assert_eq!(successes, 1);

        for id in [a.id, b.id] {
            let ancestors = authority.graph.ancestors(id).unwrap();
            assert!(ancestors.iter().all(|r| r.id != id), "role is its own ancestor");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn concurrent_status_changes_have_exactly_one_winner() {
    let bus: Arc<InMemoryEventBus<AuthorityEvent>> = Arc::new(InMemoryEventBus::new());
    let events: Subscription<AuthorityEvent> = bus.subscribe();
    let authority = Authority::in_memory_with_bus(AuthorityConfig::default(), bus).unwrap();
    let dave = user(&authority, "dave");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let directory = authority.directory.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                directory.change_status(dave, LifecycleAction::Suspend, &Actor::new(format!("admin-{i}")))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        DomainError::Conflict(_) | DomainError::InvalidTransition(_)
    )));
    assert_eq!(authority.directory.get_user(dave).unwrap().status, UserStatus::Suspended);
    let status_changes = events.drain_where(|e| matches!(e, AuthorityEvent::StatusChanged { .. }));
    assert_eq!(status_changes.len(), 1);
}

#[test]
fn deleted_user_loses_access_and_frees_the_role() {
    let Hrm {
        authority,
        hrm_admin,
        alice,
        ..
    } = hrm();
    assert!(authority.resolver.has_permission(alice, "HRM_USER_READ").unwrap());

    authority.directory.delete_user(alice, &admin()).unwrap();
    authority.resolver.invalidate(alice);

    assert!(matches!(
        authority.resolver.has_permission(alice, "HRM_USER_READ").unwrap_err(),
        DomainError::NotFound(_)
    ));
    assert!(authority.graph.delete_role(hrm_admin.id, &admin()).is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// Trust gateway
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn gateway_rejects_wrong_secret_and_inactive_system() {
    let Hrm {
        authority,
        hrm,
        credentials,
        hrm_admin,
        alice,
    } = hrm();

    assert_eq!(authority.gateway.validate("HRM", "wrong-key").unwrap_err(), DomainError::Unauthorized);
    assert!(authority.gateway.validate("HRM", &credentials.secret).is_ok());

    // Deactivation waits until no user holds an HRM role.
    assert!(matches!(
        authority.registry.deactivate_system(hrm.id, &admin()).unwrap_err(),
        DomainError::InvariantViolation(_)
    ));
    authority.directory.revoke_role(alice, hrm_admin.id, &admin()).unwrap();
    authority.registry.deactivate_system(hrm.id, &admin()).unwrap();

    assert_eq!(
        authority.gateway.validate("HRM", &credentials.secret).unwrap_err(),
        DomainError::Unauthorized
    );
}

#[test]
fn gateway_rejects_inactive_system_with_correct_secret() {
    let authority = authority();
    let (erp, credentials) = register(&authority, "ERP");
    authority.registry.deactivate_system(erp.id, &admin()).unwrap();

    assert_eq!(
        authority.gateway.validate("ERP", &credentials.secret).unwrap_err(),
        DomainError::Unauthorized
    );
}

#[test]
fn secrets_never_appear_in_events_or_serialized_systems() {
    let bus: Arc<InMemoryEventBus<AuthorityEvent>> = Arc::new(InMemoryEventBus::new());
    let events: Subscription<AuthorityEvent> = bus.subscribe();
    let authority = Authority::in_memory_with_bus(AuthorityConfig::default(), bus).unwrap();
    let (system, credentials) = register(&authority, "HRM");
    let rotated = authority.gateway.regenerate_keys(system.id, &admin()).unwrap();

    let stored = authority.registry.get_system(system.id).unwrap();
    let serialized = serde_json::to_string(&stored).unwrap();
    let payloads: Vec<String> = events.drain().iter().map(|e| e.payload().to_string()).collect();

    for secret in [&credentials.secret, &rotated.secret] {
        assert!(!serialized.contains(secret.as_str()));
        assert!(!format!("{stored:?}").contains(secret.as_str()));
        assert!(payloads.iter().all(|p| !p.contains(secret.as_str())));
    }
    assert!(!serialized.contains(&stored.secret_hash));
}
