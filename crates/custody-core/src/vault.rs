//! The custody vault: ledger state, role table, pause switch and call guard
//! composed behind one `&self` API.
//!
//! Value-moving operations follow a fixed order. Admission (pause) is checked
//! first, then the call guard is taken for the rest of the call. Inputs are
//! validated, the pause flag is checked again under the ledger lock, the
//! ledger is updated, a record is appended, and only then is
//! the rail asked to move value. No lock is held while the rail runs, so a
//! rail that calls back into the vault sees the already-updated ledger and is
//! turned away by the guard. If the rail refuses, the ledger slot and reserve
//! are restored from the undo point and a `Reverted` record follows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::access::{LedgerStatus, PauseSwitch, Role, RoleTable};
use crate::config::{DepositLimits, VaultConfig};
use crate::error::{ConfigError, CustodyError, SnapshotError};
use crate::guard::CallGuard;
use crate::ledger::{LedgerSnapshot, LedgerState, SlotUndo};
use crate::records::{Record, RecordKind, RecordSink};
use crate::transfer::{TransferError, ValueTransfer};
use crate::{Amount, Identity};

pub struct CustodyVault<T, S> {
    ledger: Mutex<LedgerState>,
    roles: Mutex<RoleTable>,
    limits: Mutex<DepositLimits>,
    pause: PauseSwitch,
    guard: CallGuard,
    next_seq: AtomicU64,
    rail: T,
    sink: S,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: ValueTransfer, S: RecordSink> CustodyVault<T, S> {
    /// Fresh, active vault with `config.initial_admin` holding admin and operator.
    pub fn new(config: VaultConfig, rail: T, sink: S) -> Result<Self, ConfigError> {
        let limits = config.validate()?;
        info!(
            admin = %config.initial_admin,
            min_deposit = %limits.min_deposit,
            max_deposit = %limits.max_deposit,
            "custody vault initialised"
        );
        Ok(Self {
            ledger: Mutex::new(LedgerState::new()),
            roles: Mutex::new(RoleTable::bootstrap(&config.initial_admin)),
            limits: Mutex::new(limits),
            pause: PauseSwitch::new(false),
            guard: CallGuard::new(),
            next_seq: AtomicU64::new(0),
            rail,
            sink,
        })
    }

    /// Rebuild a vault from a persisted snapshot. The rail must hold at least
    /// the snapshot's reserve.
    pub fn restore(snapshot: LedgerSnapshot, rail: T, sink: S) -> Result<Self, SnapshotError> {
        snapshot.verify_root()?;
        if snapshot.roles.count(Role::Admin) == 0 {
            return Err(SnapshotError::NoAdmin);
        }
        let limits = DepositLimits::new(snapshot.limits.min_deposit, snapshot.limits.max_deposit)?;
        debug!(root = %snapshot.state_root, accounts = snapshot.balances.len(), "restoring custody vault");

        let ledger = LedgerState::from_parts(snapshot.balances, snapshot.reserve_total, snapshot.swept);
        if !snapshot.swept {
            match ledger.balances_sum() {
                Some(sum) if sum == snapshot.reserve_total => {}
                sum => {
                    return Err(SnapshotError::ReserveMismatch {
                        balances: sum.unwrap_or(Amount::MAX),
                        reserve: snapshot.reserve_total,
                    })
                }
            }
        }
        let held = rail.held();
        if snapshot.reserve_total > held {
            return Err(SnapshotError::ReserveExceedsHeld {
                reserve: snapshot.reserve_total,
                held,
            });
        }
        Ok(Self {
            ledger: Mutex::new(ledger),
            roles: Mutex::new(snapshot.roles),
            limits: Mutex::new(limits),
            pause: PauseSwitch::new(snapshot.paused),
            guard: CallGuard::new(),
            next_seq: AtomicU64::new(snapshot.next_seq),
            rail,
            sink,
        })
    }

    // ---- reads -------------------------------------------------------------

    pub fn balance_of(&self, identity: &Identity) -> Amount {
        lock(&self.ledger).balance_of(identity)
    }

    pub fn reserve_total(&self) -> Amount {
        lock(&self.ledger).reserve_total()
    }

    /// Every account ever credited, in identity order.
    pub fn accounts(&self) -> Vec<(Identity, Amount)> {
        lock(&self.ledger)
            .accounts()
            .map(|(identity, amount)| (identity.clone(), amount))
            .collect()
    }

    pub fn has_role(&self, identity: &Identity, role: Role) -> bool {
        lock(&self.roles).has_role(identity, role)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn status(&self) -> LedgerStatus {
        self.pause.status()
    }

    pub fn limits(&self) -> DepositLimits {
        *lock(&self.limits)
    }

    /// True while a guarded operation is in flight.
    pub fn is_locked(&self) -> bool {
        self.guard.is_held()
    }

    pub fn rail(&self) -> &T {
        &self.rail
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let ledger = lock(&self.ledger);
        let roles = lock(&self.roles);
        LedgerSnapshot::capture(
            &ledger,
            &roles,
            self.pause.is_paused(),
            *lock(&self.limits),
            self.next_seq.load(Ordering::Acquire),
        )
    }

    // ---- guarded value movement -------------------------------------------

    /// Credit `caller` with `amount` and pull the value in through the rail.
    pub fn deposit(&self, caller: &Identity, amount: Amount) -> Result<(), CustodyError> {
        self.pause.ensure_active()?;
        let _token = self.guard.enter()?;

        let limits = self.limits();
        if amount < limits.min_deposit {
            return Err(CustodyError::BelowMinimum {
                amount,
                minimum: limits.min_deposit,
            });
        }
        if amount > limits.max_deposit {
            return Err(CustodyError::AboveMaximum {
                amount,
                maximum: limits.max_deposit,
            });
        }

        let (undo, seq) = {
            let mut ledger = lock(&self.ledger);
            // pause() flips under this lock; a pause that landed after admission wins.
            self.pause.ensure_active()?;
            let undo = ledger.undo_point(caller);
            ledger.credit(caller, amount)?;
            let seq = self.emit(RecordKind::Deposited {
                identity: caller.clone(),
                amount,
            });
            (undo, seq)
        };
        self.settle(seq, undo, self.rail.pull(caller, amount))?;
        info!(%caller, %amount, seq, "deposit");
        Ok(())
    }

    /// Debit `amount` from `caller` and push it out through the rail.
    pub fn withdraw(&self, caller: &Identity, amount: Amount) -> Result<(), CustodyError> {
        self.pause.ensure_active()?;
        let _token = self.guard.enter()?;

        if amount == 0 {
            return Err(CustodyError::ZeroAmount);
        }
        self.debit_and_push(caller, amount)
    }

    /// Withdraw the caller's whole balance. Returns the amount paid out.
    pub fn withdraw_all(&self, caller: &Identity) -> Result<Amount, CustodyError> {
        self.pause.ensure_active()?;
        let _token = self.guard.enter()?;

        let amount = self.balance_of(caller);
        if amount == 0 {
            return Err(CustodyError::InsufficientBalance {
                requested: 0,
                available: 0,
            });
        }
        self.debit_and_push(caller, amount)?;
        Ok(amount)
    }

    /// Admin-only: send everything the rail holds to `recipient`, zeroing the
    /// reserve. Individual balances are left as they are, so afterwards the
    /// reserve no longer equals their sum. Works while paused.
    pub fn emergency_sweep(&self, caller: &Identity, recipient: &Identity) -> Result<Amount, CustodyError> {
        lock(&self.roles).require(caller, Role::Admin)?;
        let _token = self.guard.enter()?;

        let held = self.rail.held();
        if held == 0 {
            return Err(CustodyError::NothingToSweep);
        }
        let undo = {
            let mut ledger = lock(&self.ledger);
            let undo = ledger.reserve_undo_point();
            ledger.drain_reserve();
            undo
        };
        let seq = self.emit(RecordKind::EmergencySwept {
            admin: caller.clone(),
            recipient: recipient.clone(),
            amount: held,
        });
        self.settle(seq, undo, self.rail.push(recipient, held))?;
        warn!(%caller, %recipient, amount = %held, seq, "emergency sweep");
        Ok(held)
    }

    fn debit_and_push(&self, caller: &Identity, amount: Amount) -> Result<(), CustodyError> {
        let (undo, seq) = {
            let mut ledger = lock(&self.ledger);
            self.pause.ensure_active()?;
            let undo = ledger.undo_point(caller);
            ledger.debit(caller, amount)?;
            let seq = self.emit(RecordKind::Withdrawn {
                identity: caller.clone(),
                amount,
            });
            (undo, seq)
        };
        self.settle(seq, undo, self.rail.push(caller, amount))?;
        info!(%caller, %amount, seq, "withdrawal");
        Ok(())
    }

    /// Keep the ledger update if the transfer went through, undo it otherwise.
    fn settle(
        &self,
        seq: u64,
        undo: SlotUndo,
        outcome: Result<(), TransferError>,
    ) -> Result<(), CustodyError> {
        let Err(err) = outcome else {
            return Ok(());
        };
        lock(&self.ledger).rollback(undo);
        self.emit(RecordKind::Reverted {
            seq,
            reason: err.to_string(),
        });
        warn!(seq, error = %err, "transfer failed, ledger update rolled back");
        Err(CustodyError::TransferFailed(err))
    }

    fn emit(&self, kind: RecordKind) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        self.sink.append(Record { seq, kind });
        seq
    }

    // ---- access / lifecycle -----------------------------------------------

    pub fn pause(&self, caller: &Identity) -> Result<(), CustodyError> {
        lock(&self.roles).require(caller, Role::Operator)?;
        // Held so the switch and its record cannot interleave with a balance update.
        let _ledger = lock(&self.ledger);
        self.pause.pause()?;
        self.emit(RecordKind::Paused { by: caller.clone() });
        info!(%caller, "ledger paused");
        Ok(())
    }

    pub fn unpause(&self, caller: &Identity) -> Result<(), CustodyError> {
        lock(&self.roles).require(caller, Role::Operator)?;
        let _ledger = lock(&self.ledger);
        self.pause.unpause()?;
        self.emit(RecordKind::Unpaused { by: caller.clone() });
        info!(%caller, "ledger unpaused");
        Ok(())
    }

    /// Returns `false` when `identity` already held `role`.
    pub fn grant_role(&self, caller: &Identity, identity: &Identity, role: Role) -> Result<bool, CustodyError> {
        let granted = {
            let mut roles = lock(&self.roles);
            roles.require(caller, Role::Admin)?;
            roles.insert(identity, role)
        };
        if granted {
            self.emit(RecordKind::RoleGranted {
                identity: identity.clone(),
                role,
                by: caller.clone(),
            });
            info!(%caller, %identity, %role, "role granted");
        }
        Ok(granted)
    }

    /// Returns `false` when `identity` did not hold `role`.
    pub fn revoke_role(&self, caller: &Identity, identity: &Identity, role: Role) -> Result<bool, CustodyError> {
        let revoked = {
            let mut roles = lock(&self.roles);
            roles.require(caller, Role::Admin)?;
            roles.remove(identity, role)?
        };
        if revoked {
            self.emit(RecordKind::RoleRevoked {
                identity: identity.clone(),
                role,
                by: caller.clone(),
            });
            info!(%caller, %identity, %role, "role revoked");
        }
        Ok(revoked)
    }

    /// The caller gives up one of its own roles.
    pub fn renounce_role(&self, caller: &Identity, role: Role) -> Result<bool, CustodyError> {
        let renounced = lock(&self.roles).remove(caller, role)?;
        if renounced {
            self.emit(RecordKind::RoleRevoked {
                identity: caller.clone(),
                role,
                by: caller.clone(),
            });
            info!(%caller, %role, "role renounced");
        }
        Ok(renounced)
    }

    pub fn set_deposit_limits(
        &self,
        caller: &Identity,
        min_deposit: Amount,
        max_deposit: Amount,
    ) -> Result<(), CustodyError> {
        lock(&self.roles).require(caller, Role::Admin)?;
        let limits = DepositLimits::new(min_deposit, max_deposit).map_err(|_| CustodyError::InvalidLimits {
            minimum: min_deposit,
            maximum: max_deposit,
        })?;
        *lock(&self.limits) = limits;
        self.emit(RecordKind::LimitsUpdated {
            min_deposit,
            max_deposit,
            by: caller.clone(),
        });
        info!(%caller, %min_deposit, %max_deposit, "deposit limits updated");
        Ok(())
    }
}
