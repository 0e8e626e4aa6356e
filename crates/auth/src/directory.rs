//! User identities, their role assignments and their lifecycle status.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use uniauth_core::{DomainError, DomainResult, RoleId, UserId};

use crate::actor::Actor;
use crate::audit::{AssignmentChange, AuditSink, AuthorityEvent};
use crate::bulk::BulkReport;
use crate::lifecycle::{LifecycleAction, LifecycleStateMachine, UserStatus};
use crate::model::{NewUser, User, UserRoleAssignment, UserSearchCriteria, UserUpdate, normalize_email};
use crate::store::AuthorityStore;

/// Tunables for status changes and login lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryPolicy {
    /// Reject inapplicable lifecycle actions instead of treating them as no-ops.
    pub strict_transitions: bool,
    /// Consecutive failures that trigger an automatic LOCK.
    pub max_failed_logins: u32,
    pub lock_duration: Duration,
}

impl Default for DirectoryPolicy {
    fn default() -> Self {
        Self {
            strict_transitions: true,
            max_failed_logins: 5,
            lock_duration: Duration::minutes(30),
        }
    }
}

pub struct UserDirectory {
    store: Arc<dyn AuthorityStore>,
    audit: Arc<dyn AuditSink>,
    policy: DirectoryPolicy,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn AuthorityStore>, audit: Arc<dyn AuditSink>, policy: DirectoryPolicy) -> Self {
        Self { store, audit, policy }
    }

    pub fn policy(&self) -> DirectoryPolicy {
        self.policy
    }

    pub fn create_user(&self, new: NewUser, actor: &Actor) -> DomainResult<User> {
        let user = new.into_user(Utc::now())?;
        self.store.insert_user(user.clone())?;

        info!(user_id = %user.id, username = %user.username, status = %user.status, actor = %actor, "user created");
        self.audit.emit(AuthorityEvent::UserRegistered {
            user_id: user.id,
            username: user.username.clone(),
            actor: actor.clone(),
            occurred_at: user.created_at,
        });
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> DomainResult<User> {
        self.store
            .user(id)?
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))
    }

    pub fn find_user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        self.store.user_by_username(username)
    }

    /// Case-insensitive; a malformed address simply finds nobody.
    pub fn find_user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        match normalize_email(email) {
            Ok(email) => self.store.user_by_email(&email),
            Err(_) => Ok(None),
        }
    }

    /// True if either the username or the email is already taken.
    pub fn user_exists(&self, username: &str, email: &str) -> DomainResult<bool> {
        Ok(self.find_user_by_username(username.trim())?.is_some() || self.find_user_by_email(email)?.is_some())
    }

    /// False for unknown usernames.
    pub fn is_user_active(&self, username: &str) -> DomainResult<bool> {
        Ok(self
            .find_user_by_username(username)?
            .is_some_and(|u| u.status == UserStatus::Active))
    }

    /// Edits profile fields. Status, lock state and login counters are not
    /// reachable from here.
    pub fn update_user(&self, id: UserId, update: UserUpdate, actor: &Actor) -> DomainResult<User> {
        if update.is_empty() {
            return self.get_user(id);
        }
        let user = self.store.update_user_profile(id, &update, Utc::now())?;

        info!(user_id = %user.id, username = %user.username, actor = %actor, "user profile updated");
        self.audit.emit(AuthorityEvent::UserUpdated {
            user_id: user.id,
            username: user.username.clone(),
            actor: actor.clone(),
            occurred_at: user.updated_at,
        });
        Ok(user)
    }

    /// Removes the user and every role it holds in one step. Cached
    /// permission sets are the caller's to invalidate.
    pub fn delete_user(&self, id: UserId, actor: &Actor) -> DomainResult<User> {
        let (user, revoked) = self.store.delete_user(id)?;
        let now = Utc::now();
        for a in &revoked {
            self.emit_assignment(a.user_id, a.role_id, AssignmentChange::Revoked, actor, now);
        }

        warn!(user_id = %user.id, username = %user.username, roles = revoked.len(), actor = %actor, "user deleted");
        self.audit.emit(AuthorityEvent::UserDeleted {
            user_id: user.id,
            username: user.username.clone(),
            revoked_roles: revoked.iter().map(|a| a.role_id).collect(),
            actor: actor.clone(),
            occurred_at: now,
        });
        Ok(user)
    }

    /// Users matching every populated filter, ordered by username. Role and
    /// system filters only count assignments in force at `now`.
    pub fn search_users(&self, criteria: &UserSearchCriteria, now: DateTime<Utc>) -> DomainResult<Vec<User>> {
        let mut users = self.store.users()?;
        users.retain(|u| criteria.matches_profile(u));

        if !criteria.system_codes.is_empty() {
            let mut holders = BTreeSet::new();
            for code in &criteria.system_codes {
                holders.extend(self.system_holders(code, now)?);
            }
            users.retain(|u| holders.contains(&u.id));
        }
        if !criteria.role_codes.is_empty() {
            let mut holders = BTreeSet::new();
            for code in &criteria.role_codes {
                if let Some(role) = self.store.role_by_code(code)? {
                    holders.extend(self.holders_of_role(role.id, now)?);
                }
            }
            users.retain(|u| holders.contains(&u.id));
        }

        users.sort_by(|a, b| a.username.cmp(&b.username));
        debug!(matched = users.len(), "user search");
        Ok(users)
    }

    /// Holders of any role of the system. `NotFound` for an unknown code.
    pub fn users_by_system(&self, system_code: &str, now: DateTime<Utc>) -> DomainResult<Vec<User>> {
        if self.store.system_by_code(system_code)?.is_none() {
            return Err(DomainError::not_found(format!("system '{system_code}'")));
        }
        let criteria = UserSearchCriteria {
            system_codes: vec![system_code.to_string()],
            ..UserSearchCriteria::default()
        };
        self.search_users(&criteria, now)
    }

    /// Holders of the role. `NotFound` for an unknown code.
    pub fn users_by_role(&self, role_code: &str, now: DateTime<Utc>) -> DomainResult<Vec<User>> {
        if self.store.role_by_code(role_code)?.is_none() {
            return Err(DomainError::not_found(format!("role '{role_code}'")));
        }
        let criteria = UserSearchCriteria {
            role_codes: vec![role_code.to_string()],
            ..UserSearchCriteria::default()
        };
        self.search_users(&criteria, now)
    }

    fn system_holders(&self, system_code: &str, now: DateTime<Utc>) -> DomainResult<BTreeSet<UserId>> {
        let mut holders = BTreeSet::new();
        if let Some(system) = self.store.system_by_code(system_code)? {
            for role in self.store.roles_for_system(Some(system.id))? {
                holders.extend(self.holders_of_role(role.id, now)?);
            }
        }
        Ok(holders)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Role assignments
    // ─────────────────────────────────────────────────────────────────────

    /// `expires_at` makes the assignment temporary; it must lie in the future.
    pub fn assign_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        expires_at: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> DomainResult<UserRoleAssignment> {
        let now = Utc::now();
        self.get_user(user_id)?;
        if self.store.role(role_id)?.is_none() {
            return Err(DomainError::not_found(format!("role {role_id}")));
        }
        if expires_at.is_some_and(|at| at <= now) {
            return Err(DomainError::validation("assignment expiry must be in the future"));
        }

        let assignment = UserRoleAssignment::new(user_id, role_id, expires_at, actor.clone(), now);
        self.store.insert_assignment(assignment.clone())?;

        info!(%user_id, %role_id, ?expires_at, actor = %actor, "role assigned");
        self.emit_assignment(user_id, role_id, AssignmentChange::Assigned { expires_at }, actor, now);
        Ok(assignment)
    }

    pub fn revoke_role(&self, user_id: UserId, role_id: RoleId, actor: &Actor) -> DomainResult<()> {
        if !self.store.delete_assignment(user_id, role_id)? {
            return Err(DomainError::not_found(format!("role {role_id} is not assigned to user {user_id}")));
        }
        info!(%user_id, %role_id, actor = %actor, "role revoked");
        self.emit_assignment(user_id, role_id, AssignmentChange::Revoked, actor, Utc::now());
        Ok(())
    }

    /// Every stored assignment, expired or not.
    pub fn assignments_for_user(&self, user_id: UserId) -> DomainResult<Vec<UserRoleAssignment>> {
        self.get_user(user_id)?;
        self.store.assignments_for_user(user_id)
    }

    /// Assignments still in force at `now`.
    pub fn active_assignments(&self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<Vec<UserRoleAssignment>> {
        let mut assignments = self.assignments_for_user(user_id)?;
        assignments.retain(|a| !a.is_expired(now));
        Ok(assignments)
    }

    pub fn holders_of_role(&self, role_id: RoleId, now: DateTime<Utc>) -> DomainResult<Vec<UserId>> {
        Ok(self
            .store
            .assignments_for_role(role_id)?
            .into_iter()
            .filter(|a| !a.is_expired(now))
            .map(|a| a.user_id)
            .collect())
    }

    /// Deletes assignments that expired before `now`. Resolution already
    /// ignores them; this only reclaims the rows.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<UserRoleAssignment>> {
        let swept = self.store.delete_expired_assignments(now)?;
        let actor = Actor::system();
        for a in &swept {
            self.emit_assignment(a.user_id, a.role_id, AssignmentChange::Expired, &actor, now);
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "expired role assignments swept");
        }
        Ok(swept)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn change_status(&self, user_id: UserId, action: LifecycleAction, actor: &Actor) -> DomainResult<User> {
        self.transition(self.get_user(user_id)?, action, None, actor)
    }

    pub fn bulk_change_status(&self, ids: &[UserId], action: LifecycleAction, actor: &Actor) -> BulkReport<UserId> {
        let mut report = BulkReport::new();
        for id in ids {
            report.record(*id, self.change_status(*id, action, actor));
        }
        report
    }

    /// Counts a failed login; reaching the threshold locks the account.
    ///
    /// If another status change lands between the count and the lock, the
    /// lock is dropped and the current row is returned.
    pub fn record_login_failure(&self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<User> {
        let user = self.store.increment_failed_logins(user_id)?;
        warn!(%user_id, attempts = user.failed_login_attempts, "login failed");

        let threshold_reached = user.failed_login_attempts >= self.policy.max_failed_logins;
        if !threshold_reached || !LifecycleStateMachine::can_apply(user.status, LifecycleAction::Lock) {
            return Ok(user);
        }
        let until = now + self.policy.lock_duration;
        match self.transition(user, LifecycleAction::Lock, Some(until), &Actor::system()) {
            Err(DomainError::Conflict(reason)) => {
                debug!(%user_id, %reason, "automatic lock lost a race; keeping current status");
                self.get_user(user_id)
            }
            other => other,
        }
    }

    pub fn record_login_success(&self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<User> {
        let user = self.store.record_successful_login(user_id, now)?;
        debug!(%user_id, "login recorded");
        Ok(user)
    }

    /// Resolves the transition, then persists it with a compare-and-swap on
    /// the status it was computed from.
    fn transition(
        &self,
        user: User,
        action: LifecycleAction,
        locked_until: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> DomainResult<User> {
        let transition = match LifecycleStateMachine::transition(user.status, action) {
            Ok(t) => t,
            Err(err) if self.policy.strict_transitions => {
                warn!(user_id = %user.id, status = %user.status, %action, actor = %actor, "lifecycle action rejected");
                return Err(err);
            }
            Err(_) => {
                debug!(user_id = %user.id, status = %user.status, %action, "lifecycle action not applicable; no-op");
                return Ok(user);
            }
        };

        let old_status = user.status;
        let user = self.store.apply_transition(user.id, &transition, locked_until)?;

        info!(
            user_id = %user.id,
            %action,
            from = %old_status,
            to = %user.status,
            risk = ?action.risk_level(),
            actor = %actor,
            "user status changed"
        );
        self.audit.emit(AuthorityEvent::StatusChanged {
            user_id: user.id,
            action,
            old_status,
            new_status: user.status,
            actor: actor.clone(),
            occurred_at: Utc::now(),
        });
        Ok(user)
    }

    fn emit_assignment(&self, user_id: UserId, role_id: RoleId, change: AssignmentChange, actor: &Actor, at: DateTime<Utc>) {
        self.audit.emit(AuthorityEvent::RoleAssignmentChanged {
            user_id,
            role_id,
            change,
            actor: actor.clone(),
            occurred_at: at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn lock_then_unlock_resets_counters() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let now = Utc::now();
        fx.directory.record_login_failure(alice.id, now).unwrap();
        fx.directory.record_login_failure(alice.id, now).unwrap();

        let locked = fx.directory.change_status(alice.id, LifecycleAction::Lock, &fx.admin).unwrap();
        assert_eq!(locked.status, UserStatus::Locked);
        assert!(locked.is_locked);
        assert_eq!(locked.failed_login_attempts, 2);

        let unlocked = fx.directory.change_status(alice.id, LifecycleAction::Unlock, &fx.admin).unwrap();
        assert_eq!(unlocked.status, UserStatus::Active);
        assert!(!unlocked.is_locked);
        assert_eq!(unlocked.failed_login_attempts, 0);
        assert_eq!(unlocked.locked_until, None);
    }

    #[test]
    fn status_change_emits_audit_record() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        fx.directory.change_status(alice.id, LifecycleAction::Suspend, &fx.admin).unwrap();

        let records: Vec<_> = fx
            .events()
            .into_iter()
            .filter(|e| matches!(e, AuthorityEvent::StatusChanged { .. }))
            .collect();
        match records.as_slice() {
            [AuthorityEvent::StatusChanged { user_id, action, old_status, new_status, actor, .. }] => {
                assert_eq!(*user_id, alice.id);
                assert_eq!(*action, LifecycleAction::Suspend);
                assert_eq!((*old_status, *new_status), (UserStatus::Active, UserStatus::Suspended));
                assert_eq!(actor, &fx.admin);
            }
            other => panic!("unexpected records: {other:?}"),
        }
    }

    #[test]
    fn strict_mode_rejects_inapplicable_actions() {
        let fx = Fixture::new();
        let alice = fx.user("alice");

        let err = fx.directory.change_status(alice.id, LifecycleAction::Unlock, &fx.admin).unwrap_err();

        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(fx.directory.get_user(alice.id).unwrap().status, UserStatus::Active);
    }

    #[test]
    fn lenient_mode_treats_inapplicable_actions_as_no_ops() {
        let fx = Fixture::with_policy(DirectoryPolicy {
            strict_transitions: false,
            ..DirectoryPolicy::default()
        });
        let alice = fx.user("alice");

        let user = fx.directory.change_status(alice.id, LifecycleAction::Unlock, &fx.admin).unwrap();

        assert_eq!(user.status, UserStatus::Active);
        assert!(!fx.events().iter().any(|e| matches!(e, AuthorityEvent::StatusChanged { .. })));
    }

    #[test]
    fn repeated_failures_lock_the_account() {
        let fx = Fixture::with_policy(DirectoryPolicy {
            max_failed_logins: 3,
            lock_duration: Duration::minutes(15),
            ..DirectoryPolicy::default()
        });
        let alice = fx.user("alice");
        let now = Utc::now();

        for _ in 0..2 {
            assert_eq!(fx.directory.record_login_failure(alice.id, now).unwrap().status, UserStatus::Active);
        }
        let locked = fx.directory.record_login_failure(alice.id, now).unwrap();

        assert_eq!(locked.status, UserStatus::Locked);
        assert_eq!(locked.locked_until, Some(now + Duration::minutes(15)));
        assert_eq!(locked.failed_login_attempts, 3);

        // Further failures keep counting but cannot re-lock a locked account.
        assert_eq!(fx.directory.record_login_failure(alice.id, now).unwrap().failed_login_attempts, 4);
    }

    #[test]
    fn successful_login_resets_the_counter() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let now = Utc::now();
        fx.directory.record_login_failure(alice.id, now).unwrap();

        let user = fx.directory.record_login_success(alice.id, now).unwrap();

        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.last_login_at, Some(now));
    }

    #[test]
    fn assignment_rules() {
        let fx = Fixture::new();
        let hrm = fx.system("HRM");
        let role = fx.role(&hrm, "HR", None);
        let alice = fx.user("alice");

        let past = Utc::now() - Duration::minutes(1);
        assert!(matches!(
            fx.directory.assign_role(alice.id, role.id, Some(past), &fx.admin).unwrap_err(),
            DomainError::Validation(_)
        ));

        let a = fx.directory.assign_role(alice.id, role.id, None, &fx.admin).unwrap();
        assert!(!a.is_temporary);
        assert!(matches!(
            fx.directory.assign_role(alice.id, role.id, None, &fx.admin).unwrap_err(),
            DomainError::Conflict(_)
        ));
        assert_eq!(fx.directory.holders_of_role(role.id, Utc::now()).unwrap(), vec![alice.id]);

        fx.directory.revoke_role(alice.id, role.id, &fx.admin).unwrap();
        assert!(matches!(
            fx.directory.revoke_role(alice.id, role.id, &fx.admin).unwrap_err(),
            DomainError::NotFound(_)
        ));
        assert!(matches!(
            fx.directory.assign_role(alice.id, RoleId::new(), None, &fx.admin).unwrap_err(),
            DomainError::NotFound(_)
        ));
    }

    #[test]
    fn sweep_removes_only_expired_rows() {
        let fx = Fixture::new();
        let hrm = fx.system("HRM");
        let temp = fx.role(&hrm, "TEMP", None);
        let perm = fx.role(&hrm, "PERM", None);
        let alice = fx.user("alice");
        let expiry = Utc::now() + Duration::hours(1);
        fx.directory.assign_role(alice.id, temp.id, Some(expiry), &fx.admin).unwrap();
        fx.directory.assign_role(alice.id, perm.id, None, &fx.admin).unwrap();

        assert!(fx.directory.sweep_expired(Utc::now()).unwrap().is_empty());
        let later = expiry + Duration::seconds(1);
        assert_eq!(fx.directory.active_assignments(alice.id, later).unwrap().len(), 1);

        let swept = fx.directory.sweep_expired(later).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].role_id, temp.id);
        assert_eq!(fx.directory.assignments_for_user(alice.id).unwrap().len(), 1);
    }

    #[test]
    fn bulk_status_change_reports_per_user() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        fx.directory.change_status(bob.id, LifecycleAction::Suspend, &fx.admin).unwrap();

        let report = fx.directory.bulk_change_status(&[alice.id, bob.id], LifecycleAction::Suspend, &fx.admin);

        assert_eq!(report.succeeded(), vec![alice.id]);
        assert_eq!(report.failed()[0].0, bob.id);
        assert_eq!(report.failed()[0].1.kind(), "invalid_transition");
    }

    #[test]
    fn duplicate_usernames_conflict() {
        let fx = Fixture::new();
        fx.user("alice");
        let err = fx
            .directory
            .create_user(NewUser::new("alice", "alice2@example.com"), &fx.admin)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn concurrent_failures_are_all_counted() {
        let fx = Fixture::with_policy(DirectoryPolicy {
            max_failed_logins: 1000,
            ..DirectoryPolicy::default()
        });
        let alice = fx.user("alice");
        let threads = 8;
        let per_thread = 25;
        let barrier = Arc::new(std::sync::Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let directory = fx.directory.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        directory.record_login_failure(alice.id, Utc::now()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stored = fx.directory.get_user(alice.id).unwrap();
        assert_eq!(stored.failed_login_attempts, (threads * per_thread) as u32);
    }

    #[test]
    fn failures_racing_an_admin_lock_keep_lock_state_consistent() {
        for _ in 0..25 {
            let fx = Fixture::with_policy(DirectoryPolicy {
                max_failed_logins: 3,
                ..DirectoryPolicy::default()
            });
            let alice = fx.user("alice");
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let failing = {
                let directory = fx.directory.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..5 {
                        directory.record_login_failure(alice.id, Utc::now()).unwrap();
                    }
                })
            };
            barrier.wait();
            let admin_lock = fx.directory.change_status(alice.id, LifecycleAction::Lock, &fx.admin);
            failing.join().unwrap();

            assert!(admin_lock.is_ok() || matches!(admin_lock, Err(DomainError::InvalidTransition(_) | DomainError::Conflict(_))));
            let stored = fx.directory.get_user(alice.id).unwrap();
            assert_eq!(stored.status, UserStatus::Locked);
            assert!(stored.is_locked);
            assert_eq!(stored.failed_login_attempts, 5);
        }
    }

    #[test]
    fn profile_update_leaves_status_alone() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        fx.directory.change_status(alice.id, LifecycleAction::Suspend, &fx.admin).unwrap();
        fx.events();

        let update = UserUpdate {
            full_name: Some("Alice Liddell".into()),
            phone: Some("555-0100".into()),
            ..Default::default()
        };
        let user = fx.directory.update_user(alice.id, update, &fx.admin).unwrap();

        assert_eq!(user.full_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(user.phone.as_deref(), Some("555-0100"));
        assert_eq!(user.status, UserStatus::Suspended);
        assert!(matches!(fx.events().as_slice(), [AuthorityEvent::UserUpdated { .. }]));

        let unchanged = fx.directory.update_user(alice.id, UserUpdate::default(), &fx.admin).unwrap();
        assert_eq!(unchanged, user);
        assert!(fx.events().is_empty());
    }

    #[test]
    fn email_lookup_and_uniqueness() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        fx.user("bob");

        assert_eq!(fx.directory.find_user_by_email(" ALICE@example.com").unwrap().map(|u| u.id), Some(alice.id));
        assert_eq!(fx.directory.find_user_by_email("nobody").unwrap(), None);

        let steal = UserUpdate { email: Some("bob@example.com".into()), ..Default::default() };
        assert!(matches!(
            fx.directory.update_user(alice.id, steal, &fx.admin).unwrap_err(),
            DomainError::Conflict(_)
        ));

        assert!(fx.directory.user_exists("alice", "fresh@example.com").unwrap());
        assert!(fx.directory.user_exists("fresh", "BOB@example.com").unwrap());
        assert!(!fx.directory.user_exists("fresh", "fresh@example.com").unwrap());
        assert!(fx.directory.is_user_active("alice").unwrap());
        assert!(!fx.directory.is_user_active("nobody").unwrap());
    }

    #[test]
    fn deleting_a_user_revokes_every_role() {
        let fx = Fixture::new();
        let hrm = fx.system("HRM");
        let (hr, payroll) = (fx.role(&hrm, "HR", None), fx.role(&hrm, "PAYROLL", None));
        let alice = fx.user("alice");
        fx.directory.assign_role(alice.id, hr.id, None, &fx.admin).unwrap();
        fx.directory.assign_role(alice.id, payroll.id, None, &fx.admin).unwrap();
        fx.events();

        let deleted = fx.directory.delete_user(alice.id, &fx.admin).unwrap();

        assert_eq!(deleted.id, alice.id);
        assert!(fx.directory.holders_of_role(hr.id, Utc::now()).unwrap().is_empty());
        assert!(matches!(fx.directory.get_user(alice.id).unwrap_err(), DomainError::NotFound(_)));
        // Held roles no longer block deletion.
        fx.graph.delete_role(hr.id, &fx.admin).unwrap();

        let events = fx.events();
        let revoked = events
            .iter()
            .filter(|e| matches!(e, AuthorityEvent::RoleAssignmentChanged { change: AssignmentChange::Revoked, .. }))
            .count();
        assert_eq!(revoked, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            AuthorityEvent::UserDeleted { revoked_roles, .. } if revoked_roles.len() == 2
        )));
        assert!(matches!(fx.directory.delete_user(alice.id, &fx.admin).unwrap_err(), DomainError::NotFound(_)));
    }

    #[test]
    fn search_combines_filters() {
        let fx = Fixture::new();
        let hrm = fx.system("HRM");
        let crm = fx.system("CRM");
        let hr = fx.role(&hrm, "HR_STAFF", None);
        let sales = fx.role(&crm, "SALES", None);
        let alice = fx.user("alice");
        let alina = fx.user("alina");
        let bob = fx.user("bob");
        let now = Utc::now();
        fx.directory.assign_role(alice.id, hr.id, None, &fx.admin).unwrap();
        fx.directory.assign_role(alina.id, sales.id, None, &fx.admin).unwrap();
        fx.directory.assign_role(bob.id, hr.id, Some(now + Duration::minutes(1)), &fx.admin).unwrap();
        fx.directory.change_status(alina.id, LifecycleAction::Suspend, &fx.admin).unwrap();

        let names = |users: Vec<User>| users.into_iter().map(|u| u.username).collect::<Vec<_>>();

        assert_eq!(names(fx.directory.search_users(&UserSearchCriteria::keyword("ALI"), now).unwrap()), ["alice", "alina"]);
        assert_eq!(names(fx.directory.users_by_system("HRM", now).unwrap()), ["alice", "bob"]);
        assert_eq!(names(fx.directory.users_by_role("SALES", now).unwrap()), ["alina"]);

        // Bob's assignment has lapsed by then.
        let later = now + Duration::hours(1);
        assert_eq!(names(fx.directory.users_by_system("HRM", later).unwrap()), ["alice"]);

        let criteria = UserSearchCriteria {
            keyword: Some("ali".into()),
            system_codes: vec!["HRM".into(), "CRM".into()],
            is_active: Some(true),
            ..Default::default()
        };
        assert_eq!(names(fx.directory.search_users(&criteria, now).unwrap()), ["alice"]);

        let unknown_role = UserSearchCriteria { role_codes: vec!["NOPE".into()], ..Default::default() };
        assert!(fx.directory.search_users(&unknown_role, now).unwrap().is_empty());
        assert!(matches!(fx.directory.users_by_system("NOPE", now).unwrap_err(), DomainError::NotFound(_)));
        assert!(matches!(fx.directory.users_by_role("NOPE", now).unwrap_err(), DomainError::NotFound(_)));
    }
}
