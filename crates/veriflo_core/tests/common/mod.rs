#![allow(dead_code)]

use rusqlite::Connection;
use std::sync::atomic::{AtomicU32, Ordering};
use veriflo_core::{
    CreditEvent, Plan, Profile, ProfileRepository, RepoResult, SqliteProfileRepository, UserId,
};

/// Repository that loses every compare-and-swap, simulating a writer that
/// always gets in first. The guarded decrement can be disabled as well.
pub struct ContendedRepository<'conn> {
    pub inner: SqliteProfileRepository<'conn>,
    pub guarded_decrement_wins: bool,
    pub cas_calls: AtomicU32,
}

impl<'conn> ContendedRepository<'conn> {
    pub fn new(conn: &'conn Connection, guarded_decrement_wins: bool) -> Self {
        Self {
            inner: SqliteProfileRepository::new(conn),
            guarded_decrement_wins,
            cas_calls: AtomicU32::new(0),
        }
    }
}

impl ProfileRepository for ContendedRepository<'_> {
    fn create_profile(&self, profile: &Profile) -> RepoResult<UserId> {
        self.inner.create_profile(profile)
    }

    fn get_profile(&self, id: UserId) -> RepoResult<Option<Profile>> {
        self.inner.get_profile(id)
    }

    fn list_profiles(&self) -> RepoResult<Vec<Profile>> {
        self.inner.list_profiles()
    }

    fn read_balance(&self, id: UserId) -> RepoResult<i64> {
        self.inner.read_balance(id)
    }

    fn compare_and_swap_balance(&self, _id: UserId, _expected: i64, _new: i64) -> RepoResult<bool> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn decrement_if_sufficient(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>> {
        if self.guarded_decrement_wins {
            self.inner.decrement_if_sufficient(id, amount)
        } else {
            Ok(None)
        }
    }

    fn increment_balance(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>> {
        self.inner.increment_balance(id, amount)
    }

    fn reset_if_due(
        &self,
        id: UserId,
        allotment: i64,
        now_ms: i64,
        cutoff_ms: i64,
    ) -> RepoResult<bool> {
        self.inner.reset_if_due(id, allotment, now_ms, cutoff_ms)
    }

    fn list_due_for_reset(&self, cutoff_ms: i64) -> RepoResult<Vec<UserId>> {
        self.inner.list_due_for_reset(cutoff_ms)
    }

    fn set_plan(&self, id: UserId, plan: Plan, allotment: i64, now_ms: i64) -> RepoResult<()> {
        self.inner.set_plan(id, plan, allotment, now_ms)
    }

    fn consume_document(&self, id: UserId, limit: Option<i64>) -> RepoResult<Option<i64>> {
        self.inner.consume_document(id, limit)
    }

    fn record_event(&self, event: &CreditEvent) -> RepoResult<i64> {
        self.inner.record_event(event)
    }

    fn list_events(&self, id: UserId, limit: u32) -> RepoResult<Vec<CreditEvent>> {
        self.inner.list_events(id, limit)
    }
}

/// Inserts a profile with an exact balance, bypassing plan allotments.
pub fn seed_profile(conn: &Connection, credits: i64) -> UserId {
    let repo = SqliteProfileRepository::new(conn);
    let mut profile = Profile::new(uuid::Uuid::new_v4(), Plan::Pro, 0);
    profile.credits = credits;
    repo.create_profile(&profile).unwrap();
    profile.user_id
}

/// Forces a stored balance, negative values included.
pub fn force_balance(conn: &Connection, user_id: UserId, credits: i64) {
    conn.execute(
        "UPDATE profiles SET credits = ?1 WHERE user_id = ?2;",
        rusqlite::params![credits, user_id.to_string()],
    )
    .unwrap();
}
