mod common;

use common::{force_balance, seed_profile};
use veriflo_core::db::open_db_in_memory;
use veriflo_core::{
    CreditEvent, CreditEventKind, Operation, Plan, Profile, ProfileRepository, RepoError,
    SqliteProfileRepository,
};

#[test]
fn create_and_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);

    let mut profile = Profile::new(uuid::Uuid::new_v4(), Plan::Starter, 1_700_000_000_000);
    profile.email = Some("ops@veriflo.test".to_string());
    repo.create_profile(&profile).unwrap();

    let loaded = repo.get_profile(profile.user_id).unwrap().unwrap();
    assert_eq!(loaded, profile);
    assert_eq!(repo.read_balance(profile.user_id).unwrap(), 1_000);
}

#[test]
fn duplicate_profile_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let profile = Profile::new(uuid::Uuid::new_v4(), Plan::Free, 0);

    repo.create_profile(&profile).unwrap();
    let err = repo.create_profile(&profile).unwrap_err();
    assert!(matches!(err, RepoError::Duplicate(id) if id == profile.user_id));
}

#[test]
fn invalid_email_blocks_create() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let mut profile = Profile::new(uuid::Uuid::new_v4(), Plan::Free, 0);
    profile.email = Some("not-an-address".to_string());

    assert!(matches!(
        repo.create_profile(&profile).unwrap_err(),
        RepoError::Validation(_)
    ));
}

#[test]
fn read_balance_of_unknown_profile_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        repo.read_balance(missing).unwrap_err(),
        RepoError::NotFound(id) if id == missing
    ));
}

#[test]
fn compare_and_swap_only_applies_on_expected_value() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 500);

    assert!(!repo.compare_and_swap_balance(user, 499, 100).unwrap());
    assert_eq!(repo.read_balance(user).unwrap(), 500);

    assert!(repo.compare_and_swap_balance(user, 500, 100).unwrap());
    assert_eq!(repo.read_balance(user).unwrap(), 100);

    // A stale expected value from before the first swap loses.
    assert!(!repo.compare_and_swap_balance(user, 500, 0).unwrap());
    assert_eq!(repo.read_balance(user).unwrap(), 100);
}

#[test]
fn compare_and_swap_clamps_negative_target() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 10);

    assert!(repo.compare_and_swap_balance(user, 10, -40).unwrap());
    assert_eq!(repo.read_balance(user).unwrap(), 0);
}

#[test]
fn guarded_decrement_refuses_overdraft() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 30);

    assert_eq!(repo.decrement_if_sufficient(user, 31).unwrap(), None);
    assert_eq!(repo.decrement_if_sufficient(user, 30).unwrap(), Some(0));
    assert_eq!(repo.decrement_if_sufficient(user, 1).unwrap(), None);
    assert_eq!(repo.read_balance(user).unwrap(), 0);
}

#[test]
fn increment_treats_negative_stored_balance_as_zero() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 0);
    force_balance(&conn, user, -20);

    assert_eq!(repo.increment_balance(user, 15).unwrap(), Some(15));
}

#[test]
fn increment_refuses_sums_past_i64_max() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 10);

    assert_eq!(repo.increment_balance(user, i64::MAX).unwrap(), None);
    assert_eq!(repo.increment_balance(user, -3).unwrap(), None);
    assert_eq!(repo.read_balance(user).unwrap(), 10);
    assert_eq!(
        repo.increment_balance(user, i64::MAX - 10).unwrap(),
        Some(i64::MAX)
    );

    let stored_type: String = conn
        .query_row(
            "SELECT typeof(credits) FROM profiles WHERE user_id = ?1;",
            [user.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored_type, "integer");
}

#[test]
fn increment_on_missing_profile_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        repo.increment_balance(missing, 5).unwrap_err(),
        RepoError::NotFound(id) if id == missing
    ));
}

#[test]
fn reset_guard_fires_once_per_window() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 3);

    // last_reset_at is 0 for seeded profiles.
    assert!(repo.reset_if_due(user, 5_000, 1_000, 0).unwrap());
    assert!(!repo.reset_if_due(user, 5_000, 1_001, 0).unwrap());

    let profile = repo.get_profile(user).unwrap().unwrap();
    assert_eq!(profile.credits, 5_000);
    assert_eq!(profile.last_reset_at, Some(1_000));
    assert_eq!(profile.documents_used, 0);
}

#[test]
fn list_due_for_reset_includes_never_reset_profiles() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let fresh = seed_profile(&conn, 1);
    let never = seed_profile(&conn, 1);
    conn.execute(
        "UPDATE profiles SET last_reset_at = NULL WHERE user_id = ?1;",
        [never.to_string()],
    )
    .unwrap();
    conn.execute(
        "UPDATE profiles SET last_reset_at = 10 WHERE user_id = ?1;",
        [fresh.to_string()],
    )
    .unwrap();

    let due = repo.list_due_for_reset(5).unwrap();
    assert_eq!(due, vec![never]);
}

#[test]
fn consume_document_stops_at_limit() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 0);

    assert_eq!(repo.consume_document(user, Some(2)).unwrap(), Some(1));
    assert_eq!(repo.consume_document(user, Some(2)).unwrap(), Some(2));
    assert_eq!(repo.consume_document(user, Some(2)).unwrap(), None);
    assert_eq!(repo.consume_document(user, None).unwrap(), Some(3));
}

#[test]
fn set_plan_grants_allotment_and_unknown_profile_fails() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 7);

    repo.set_plan(user, Plan::Enterprise, 25_000, 99).unwrap();
    let profile = repo.get_profile(user).unwrap().unwrap();
    assert_eq!(profile.plan, Plan::Enterprise);
    assert_eq!(profile.credits, 25_000);
    assert_eq!(profile.last_reset_at, Some(99));

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        repo.set_plan(missing, Plan::Free, 200, 0).unwrap_err(),
        RepoError::NotFound(_)
    ));
}

#[test]
fn events_are_listed_newest_first_with_limit() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteProfileRepository::new(&conn);
    let user = seed_profile(&conn, 100);

    repo.record_event(&CreditEvent::new(user, CreditEventKind::Reset, 100, 100, 1))
        .unwrap();
    repo.record_event(
        &CreditEvent::new(user, CreditEventKind::Charge, -10, 90, 2)
            .with_operation(Some(Operation::Extraction)),
    )
    .unwrap();
    repo.record_event(&CreditEvent::new(user, CreditEventKind::Refund, 10, 100, 3))
        .unwrap();

    let events = repo.list_events(user, 2).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, CreditEventKind::Refund);
    assert_eq!(events[1].kind, CreditEventKind::Charge);
    assert_eq!(events[1].operation, Some(Operation::Extraction));
    assert!(events[1].id.is_some());
}
