use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use uniauth_auth::model::{AccessLevel, NewRole, NewSystem, NewUser};
use uniauth_auth::Actor;
use uniauth_core::{RoleId, UserId};
use uniauth_infra::{Authority, AuthorityConfig};

/// A chain of `depth` roles, each granting `per_role` permissions, with one
/// user holding the deepest role.
fn chain(config: AuthorityConfig, depth: usize, per_role: usize) -> (Authority, UserId) {
    let authority = Authority::in_memory(config).expect("valid config");
    let admin = Actor::new("bench");
    let (system, _) = authority
        .registry
        .register_system(NewSystem::new("BENCH", "Benchmark"), &admin)
        .expect("register");

    let mut parent: Option<RoleId> = None;
    for level in 0..depth {
        let mut new = NewRole::new(system.id, format!("ROLE_{level}"), format!("Role {level}"));
        new.parent_id = parent;
        let role = authority.graph.create_role(new, &admin).expect("role");
        let resource = format!("RES{level}");
        for permission in authority
            .catalog
            .create_module_permissions(system.id, &resource, &["READ", "WRITE", "EXPORT", "APPROVE"][..per_role.min(4)], &admin)
            .expect("permissions")
        {
            authority
                .graph
                .assign_permission(role.id, permission.id, AccessLevel::Allow, &admin)
                .expect("grant");
        }
        parent = Some(role.id);
    }

    let user = authority
        .directory
        .create_user(NewUser::new("bench", "bench@example.com"), &admin)
        .expect("user");
    authority
        .directory
        .assign_role(user.id, parent.expect("depth > 0"), None, &admin)
        .expect("assign");
    (authority, user.id)
}

fn bench_has_permission(c: &mut Criterion) {
    let mut group = c.benchmark_group("has_permission");

    for depth in [1usize, 4, 16] {
        let uncached = AuthorityConfig {
            cache_ttl_ms: 0,
            ..AuthorityConfig::default()
        };
        let (authority, user) = chain(uncached, depth, 4);
        group.bench_with_input(BenchmarkId::new("uncached", depth), &depth, |b, _| {
            b.iter(|| authority.resolver.has_permission(black_box(user), black_box("RES0_READ")))
        });

        let (authority, user) = chain(AuthorityConfig::default(), depth, 4);
        group.bench_with_input(BenchmarkId::new("cached", depth), &depth, |b, _| {
            b.iter(|| authority.resolver.has_permission(black_box(user), black_box("RES0_READ")))
        });
    }

    group.finish();
}

fn bench_role_effective_permissions(c: &mut Criterion) {
    let mut group = c.benchmark_group("role_effective_permissions");

    for depth in [1usize, 8, 32] {
        let (authority, user) = chain(AuthorityConfig::default(), depth, 2);
        let role_id = authority.directory.assignments_for_user(user).expect("assignments")[0].role_id;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| authority.graph.effective_permissions(black_box(role_id)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_has_permission, bench_role_effective_permissions);
criterion_main!(benches);
