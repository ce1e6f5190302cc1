use veriflo_core::db::open_db_in_memory;
use veriflo_core::{
    CreditEventKind, CreditLedger, LedgerError, Plan, ResetOutcome, SqliteProfileRepository,
    DAY_MS,
};

const SIGNUP_MS: i64 = 1_700_000_000_000;
const WINDOW_MS: i64 = 30 * DAY_MS;

#[test]
fn open_account_grants_plan_allotment() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();

    let profile = ledger
        .open_account_at(user, Some("billing@acme.test".to_string()), Plan::Pro, SIGNUP_MS)
        .unwrap();
    assert_eq!(profile.credits, 5_000);
    assert_eq!(ledger.balance(user).unwrap(), 5_000);

    let err = ledger
        .open_account_at(user, None, Plan::Free, SIGNUP_MS)
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountExists(id) if id == user));
    assert_eq!(err.error_code(), "account_exists");
}

#[test]
fn reset_is_not_due_inside_window() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger.open_account_at(user, None, Plan::Starter, SIGNUP_MS).unwrap();
    ledger.charge(user, 400).unwrap();

    let outcome = ledger.reset_if_due_at(user, SIGNUP_MS + WINDOW_MS - 1).unwrap();
    assert_eq!(
        outcome,
        ResetOutcome::NotDue {
            next_reset_at: SIGNUP_MS + WINDOW_MS
        }
    );
    assert_eq!(ledger.balance(user).unwrap(), 600);
}

#[test]
fn reset_restores_allotment_once_per_window() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger.open_account_at(user, None, Plan::Starter, SIGNUP_MS).unwrap();
    ledger.charge(user, 950).unwrap();

    let now = SIGNUP_MS + WINDOW_MS;
    assert_eq!(
        ledger.reset_if_due_at(user, now).unwrap(),
        ResetOutcome::Reset { balance: 1_000 }
    );
    ledger.charge(user, 100).unwrap();

    // Second call in immediate succession must not credit again.
    assert_eq!(
        ledger.reset_if_due_at(user, now + 1).unwrap(),
        ResetOutcome::NotDue {
            next_reset_at: now + WINDOW_MS
        }
    );
    assert_eq!(ledger.balance(user).unwrap(), 900);

    let resets = ledger
        .history(user, 50)
        .unwrap()
        .into_iter()
        .filter(|event| event.kind == CreditEventKind::Reset)
        .count();
    // Sign-up grant plus one monthly reset.
    assert_eq!(resets, 2);
}

#[test]
fn never_reset_profile_is_due_immediately() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger.open_account_at(user, None, Plan::Free, SIGNUP_MS).unwrap();
    conn.execute(
        "UPDATE profiles SET last_reset_at = NULL, credits = 3 WHERE user_id = ?1;",
        [user.to_string()],
    )
    .unwrap();

    assert_eq!(
        ledger.reset_if_due_at(user, SIGNUP_MS).unwrap(),
        ResetOutcome::Reset { balance: 200 }
    );
}

#[test]
fn batch_reset_only_touches_due_accounts() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let stale = uuid::Uuid::new_v4();
    let recent = uuid::Uuid::new_v4();
    ledger.open_account_at(stale, None, Plan::Free, SIGNUP_MS).unwrap();
    ledger
        .open_account_at(recent, None, Plan::Free, SIGNUP_MS + 10 * DAY_MS)
        .unwrap();
    ledger.charge(stale, 150).unwrap();
    ledger.charge(recent, 150).unwrap();

    let now = SIGNUP_MS + WINDOW_MS;
    let summary = ledger.reset_all_due_at(now).unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.reset, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(ledger.balance(stale).unwrap(), 200);
    assert_eq!(ledger.balance(recent).unwrap(), 50);

    let again = ledger.reset_all_due_at(now).unwrap();
    assert_eq!(again.reset, 0);
    assert_eq!(ledger.balance(stale).unwrap(), 200);
}

#[test]
fn change_plan_grants_new_allotment() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger.open_account_at(user, None, Plan::Free, SIGNUP_MS).unwrap();
    ledger.charge(user, 190).unwrap();

    assert_eq!(ledger.change_plan(user, Plan::Pro).unwrap(), 5_000);
    let profile = ledger.profile(user).unwrap();
    assert_eq!(profile.plan, Plan::Pro);
    assert_eq!(profile.credits, 5_000);
    assert_eq!(
        ledger.history(user, 1).unwrap()[0].kind,
        CreditEventKind::PlanChange
    );
}

#[test]
fn document_quota_follows_plan_and_resets() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger.open_account_at(user, None, Plan::Free, SIGNUP_MS).unwrap();

    for expected in 1..=10 {
        assert_eq!(ledger.consume_document(user).unwrap(), expected);
    }
    assert!(matches!(
        ledger.consume_document(user).unwrap_err(),
        LedgerError::DocumentQuotaExceeded { used: 10, limit: 10 }
    ));

    ledger.reset_if_due_at(user, SIGNUP_MS + WINDOW_MS).unwrap();
    assert_eq!(ledger.consume_document(user).unwrap(), 1);
}

#[test]
fn enterprise_documents_are_unlimited() {
    let conn = open_db_in_memory().unwrap();
    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let user = uuid::Uuid::new_v4();
    ledger
        .open_account_at(user, None, Plan::Enterprise, SIGNUP_MS)
        .unwrap();

    for _ in 0..1_000 {
        ledger.consume_document(user).unwrap();
    }
    assert_eq!(ledger.profile(user).unwrap().documents_used, 1_000);
}
