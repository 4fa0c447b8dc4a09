mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use custody_core::{
    Amount, CustodyError, CustodyVault, Identity, MemoryJournal, RecordKind, Role, TransferError,
    ValueTransfer, VaultConfig, UNIT,
};

use common::{id, vault_with, WalletRail, ADMIN};

const MIN: u128 = UNIT / 100;
const MAX: u128 = 100 * UNIT;

#[test]
fn deposit_then_partial_withdrawal() {
    let (vault, rail, journal) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);

    vault.deposit(&id("A"), UNIT).unwrap();
    assert_eq!(vault.balance_of(&id("A")), UNIT);
    assert_eq!(vault.reserve_total(), UNIT);

    vault.withdraw(&id("A"), UNIT * 4 / 10).unwrap();
    assert_eq!(vault.balance_of(&id("A")), UNIT * 6 / 10);
    assert_eq!(vault.reserve_total(), UNIT * 6 / 10);
    assert_eq!(rail.wallet("A"), 4 * UNIT + UNIT * 4 / 10);
    assert_eq!(vault.accounts(), vec![(id("A"), UNIT * 6 / 10)]);

    let kinds: Vec<RecordKind> = journal.records().into_iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RecordKind::Deposited {
                identity: id("A"),
                amount: UNIT
            },
            RecordKind::Withdrawn {
                identity: id("A"),
                amount: UNIT * 4 / 10
            },
        ]
    );
}

#[test]
fn boundaries() {
    let (vault, rail, _) = vault_with(MIN, MAX);
    rail.fund("A", 1_000 * UNIT);

    assert!(matches!(
        vault.deposit(&id("A"), MIN - 1),
        Err(CustodyError::BelowMinimum { .. })
    ));
    assert!(matches!(
        vault.deposit(&id("A"), MAX + 1),
        Err(CustodyError::AboveMaximum { .. })
    ));
    vault.deposit(&id("A"), UNIT).unwrap();
    assert_eq!(
        vault.withdraw(&id("A"), UNIT + 1),
        Err(CustodyError::InsufficientBalance {
            requested: UNIT + 1,
            available: UNIT
        })
    );
    assert_eq!(
        vault.withdraw_all(&id("B")),
        Err(CustodyError::InsufficientBalance {
            requested: 0,
            available: 0
        })
    );
}

#[test]
fn pause_blocks_value_movement_but_not_sweep() {
    let (vault, rail, _) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);
    vault.deposit(&id("A"), 2 * UNIT).unwrap();

    vault.grant_role(&id(ADMIN), &id("ops"), Role::Operator).unwrap();
    vault.pause(&id("ops")).unwrap();

    assert_eq!(vault.deposit(&id("A"), UNIT), Err(CustodyError::Paused));
    assert_eq!(vault.withdraw(&id("A"), UNIT), Err(CustodyError::Paused));
    assert_eq!(vault.withdraw_all(&id("A")), Err(CustodyError::Paused));

    assert_eq!(vault.emergency_sweep(&id(ADMIN), &id("cold")).unwrap(), 2 * UNIT);
    assert_eq!(rail.wallet("cold"), 2 * UNIT);

    vault.unpause(&id("ops")).unwrap();
    assert!(!vault.is_paused());
}

#[test]
fn non_admin_sweep_moves_nothing() {
    let (vault, rail, journal) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);
    vault.deposit(&id("A"), 2 * UNIT).unwrap();
    let records = journal.len();

    let err = vault.emergency_sweep(&id("A"), &id("A")).unwrap_err();
    assert_eq!(
        err,
        CustodyError::Unauthorized {
            caller: id("A"),
            role: Role::Admin
        }
    );
    assert_eq!(vault.reserve_total(), 2 * UNIT);
    assert_eq!(rail.wallet("A"), 3 * UNIT);
    assert_eq!(journal.len(), records);
}

#[test]
fn sole_admin_cannot_be_revoked() {
    let (vault, _, _) = vault_with(MIN, MAX);
    let before = vault.snapshot();
    assert_eq!(
        vault.revoke_role(&id(ADMIN), &id(ADMIN), Role::Admin),
        Err(CustodyError::LastAdminProtected)
    );
    assert_eq!(vault.snapshot().roles, before.roles);

    vault.grant_role(&id(ADMIN), &id("heir"), Role::Admin).unwrap();
    assert!(vault.revoke_role(&id("heir"), &id(ADMIN), Role::Admin).unwrap());
    assert_eq!(
        vault.revoke_role(&id("heir"), &id("heir"), Role::Admin),
        Err(CustodyError::LastAdminProtected)
    );
}

#[test]
fn operator_role_gates_pause() {
    let (vault, _, _) = vault_with(MIN, MAX);
    assert!(matches!(
        vault.pause(&id("stranger")),
        Err(CustodyError::Unauthorized {
            role: Role::Operator,
            ..
        })
    ));
    assert!(!vault.is_paused());
    assert!(matches!(
        vault.grant_role(&id("stranger"), &id("stranger"), Role::Admin),
        Err(CustodyError::Unauthorized { .. })
    ));
}

#[test]
fn rejected_payout_is_rolled_back_and_reported() {
    let (vault, rail, journal) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);
    vault.deposit(&id("A"), 2 * UNIT).unwrap();
    rail.block("A");

    let before = vault.snapshot();
    assert!(matches!(
        vault.withdraw_all(&id("A")),
        Err(CustodyError::TransferFailed(_))
    ));
    let after = vault.snapshot();
    assert_eq!(after.balances, before.balances);
    assert_eq!(after.reserve_total, before.reserve_total);
    assert!(!vault.is_locked());

    let last = journal.last().unwrap();
    assert!(matches!(last.kind, RecordKind::Reverted { seq, .. } if seq == last.seq - 1));
}

#[test]
fn vault_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<common::Vault>();
}

#[test]
fn refused_sweep_restores_reserve() {
    let (vault, rail, journal) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);
    vault.deposit(&id("A"), 2 * UNIT).unwrap();
    rail.block("cold");

    assert_eq!(
        vault.emergency_sweep(&id(ADMIN), &id("cold")),
        Err(CustodyError::TransferFailed(TransferError::Rejected(id("cold"))))
    );
    let snap = vault.snapshot();
    assert_eq!(snap.reserve_total, 2 * UNIT);
    assert!(!snap.swept);
    assert_eq!(rail.held(), 2 * UNIT);
    assert!(!vault.is_locked());

    let records = journal.records();
    assert_eq!(records.len(), 3);
    assert!(matches!(records[1].kind, RecordKind::EmergencySwept { amount, .. } if amount == 2 * UNIT));
    assert!(matches!(records[2].kind, RecordKind::Reverted { seq: 1, .. }));
}

#[test]
fn swept_ledger_restores_and_keeps_paying_out() {
    let (vault, rail, journal) = vault_with(MIN, MAX);
    rail.fund("A", 5 * UNIT);
    rail.fund("B", 5 * UNIT);
    vault.deposit(&id("A"), 2 * UNIT).unwrap();
    vault.emergency_sweep(&id(ADMIN), &id("cold")).unwrap();

    let snap = vault.snapshot();
    assert!(snap.swept);
    assert_eq!(snap.reserve_total, 0);
    let vault = CustodyVault::restore(snap, rail.clone(), journal).unwrap();
    assert_eq!(vault.balance_of(&id("A")), 2 * UNIT);
    assert_eq!(vault.reserve_total(), 0);

    // new value flows in; the old balance can draw on it
    vault.deposit(&id("B"), UNIT).unwrap();
    vault.withdraw(&id("A"), UNIT / 2).unwrap();
    assert_eq!(vault.reserve_total(), UNIT / 2);
    assert_eq!(rail.held(), UNIT / 2);
    assert_eq!(vault.balance_of(&id("A")), 2 * UNIT - UNIT / 2);

    // more than the rail holds is refused and rolled back
    assert!(matches!(
        vault.withdraw(&id("A"), UNIT),
        Err(CustodyError::TransferFailed(TransferError::Unavailable(_)))
    ));
    assert_eq!(vault.reserve_total(), UNIT / 2);
}

/// Wallet rail whose `pull` parks until the test releases it.
struct GatedRail {
    wallets: WalletRail,
    entered: Barrier,
    release: Barrier,
}

impl ValueTransfer for GatedRail {
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        self.entered.wait();
        self.release.wait();
        self.wallets.pull(from, amount)
    }

    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        self.wallets.push(to, amount)
    }

    fn held(&self) -> Amount {
        self.wallets.held()
    }
}

#[test]
fn second_thread_is_turned_away_while_a_call_is_in_flight() {
    let rail = Arc::new(GatedRail {
        wallets: WalletRail::default(),
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    rail.wallets.fund("A", 5 * UNIT);
    rail.wallets.fund("B", 5 * UNIT);
    let journal = MemoryJournal::new();
    let vault = Arc::new(
        CustodyVault::new(
            VaultConfig::new(ADMIN).with_limits(MIN, MAX),
            rail.clone(),
            journal.clone(),
        )
        .unwrap(),
    );

    let in_flight = {
        let vault = Arc::clone(&vault);
        thread::spawn(move || vault.deposit(&id("A"), UNIT))
    };
    rail.entered.wait();

    assert!(vault.is_locked());
    assert_eq!(vault.deposit(&id("B"), UNIT), Err(CustodyError::ReentrantCall));
    assert_eq!(vault.withdraw_all(&id("A")), Err(CustodyError::ReentrantCall));
    vault.pause(&id(ADMIN)).unwrap();

    rail.release.wait();
    in_flight.join().unwrap().unwrap();

    assert!(!vault.is_locked());
    assert_eq!(vault.balance_of(&id("A")), UNIT);
    assert_eq!(vault.balance_of(&id("B")), 0);
    assert_eq!(vault.deposit(&id("A"), UNIT), Err(CustodyError::Paused));
    let kinds: Vec<RecordKind> = journal.records().into_iter().map(|r| r.kind).collect();
    assert!(matches!(
        kinds[..],
        [RecordKind::Deposited { .. }, RecordKind::Paused { .. }]
    ));
}

#[test]
fn no_balance_update_is_recorded_after_pause() {
    const ROUNDS: usize = 400;
    let users = ["A", "B", "C", "D"];
    let (vault, rail, journal) = vault_with(MIN, MAX);
    for user in users {
        rail.fund(user, ROUNDS as Amount * MIN);
    }
    let vault = Arc::new(vault);
    let start = Arc::new(Barrier::new(users.len() + 1));

    let workers: Vec<_> = users
        .iter()
        .map(|user| {
            let vault = Arc::clone(&vault);
            let start = Arc::clone(&start);
            let who = id(user);
            thread::spawn(move || {
                start.wait();
                for round in 0..ROUNDS {
                    let _ = if round % 3 == 2 {
                        vault.withdraw(&who, MIN)
                    } else {
                        vault.deposit(&who, MIN)
                    };
                }
            })
        })
        .collect();
    start.wait();
    thread::yield_now();
    vault.pause(&id(ADMIN)).unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    let records = journal.records();
    let paused_at = records
        .iter()
        .find(|r| matches!(r.kind, RecordKind::Paused { .. }))
        .map(|r| r.seq)
        .unwrap();
    for record in &records {
        if matches!(
            record.kind,
            RecordKind::Deposited { .. } | RecordKind::Withdrawn { .. }
        ) {
            assert!(record.seq < paused_at, "{record:?} landed after the pause");
        }
    }
    let snap = vault.snapshot();
    assert_eq!(snap.balances.values().sum::<Amount>(), snap.reserve_total);
    assert_eq!(snap.reserve_total, rail.held());
}
