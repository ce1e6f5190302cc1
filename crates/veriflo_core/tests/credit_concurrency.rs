//! Concurrent charges from independent connections against one file.

mod common;

use common::seed_profile;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use veriflo_core::db::open_db;
use veriflo_core::{CreditLedger, LedgerError, SqliteProfileRepository, UserId};

#[derive(Debug, Default)]
struct Tally {
    charged: i64,
    insufficient: usize,
    contended: usize,
}

fn race_charges(
    path: &Path,
    user: UserId,
    workers: usize,
    charges_each: usize,
    amount: i64,
) -> Tally {
    let barrier = Arc::new(Barrier::new(workers));
    let handles = (0..workers)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let path = path.to_path_buf();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
                let mut tally = Tally::default();
                barrier.wait();
                for _ in 0..charges_each {
                    match ledger.charge(user, amount) {
                        Ok(receipt) => {
                            assert!(receipt.balance_after >= 0);
                            tally.charged += receipt.charged;
                        }
                        Err(LedgerError::InsufficientCredits { available, .. }) => {
                            assert!(available >= 0);
                            tally.insufficient += 1;
                        }
                        Err(LedgerError::ConcurrentUpdate { .. }) => tally.contended += 1,
                        Err(other) => panic!("unexpected ledger error: {other}"),
                    }
                }
                tally
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .fold(Tally::default(), |mut total, tally| {
            total.charged += tally.charged;
            total.insufficient += tally.insufficient;
            total.contended += tally.contended;
            total
        })
}

#[test]
fn racing_charges_never_overdraw() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let conn = open_db(&path).unwrap();
    let user = seed_profile(&conn, 1_000);

    let tally = race_charges(&path, user, 20, 1, 100);

    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    let remaining = ledger.balance(user).unwrap();
    assert!(tally.charged <= 1_000);
    assert_eq!(remaining, 1_000 - tally.charged);
    assert!(remaining >= 0);
    // Only ten charges of 100 fit; everyone else is refused.
    assert!(tally.charged == 1_000 || tally.contended > 0);
    let winners = usize::try_from(tally.charged / 100).unwrap();
    assert_eq!(tally.insufficient + tally.contended, 20 - winners);
}

#[test]
fn racing_charges_that_fit_all_succeed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let conn = open_db(&path).unwrap();
    let user = seed_profile(&conn, 200);

    let tally = race_charges(&path, user, 8, 20, 1);

    let ledger = CreditLedger::new(SqliteProfileRepository::new(&conn));
    assert_eq!(tally.insufficient, 0);
    assert_eq!(tally.contended, 0);
    assert_eq!(tally.charged, 160);
    assert_eq!(ledger.balance(user).unwrap(), 40);
    assert_eq!(ledger.history(user, 500).unwrap().len(), 160);
}
