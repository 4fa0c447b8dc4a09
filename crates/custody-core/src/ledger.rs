use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::RoleTable;
use crate::config::DepositLimits;
use crate::error::{CustodyError, SnapshotError};
use crate::{Amount, Identity};

/// Balances and the aggregate reserve. Only the vault holds a mutable one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    balances: BTreeMap<Identity, Amount>,
    reserve_total: Amount,
    /// Set once an emergency sweep has decoupled balances from the reserve.
    swept: bool,
}

/// Pre-image of at most one balance slot plus the reserve, for rollback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SlotUndo {
    slot: Option<(Identity, Option<Amount>)>,
    reserve_total: Amount,
    swept: bool,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, identity: &Identity) -> Amount {
        self.balances.get(identity).copied().unwrap_or(0)
    }

    pub fn reserve_total(&self) -> Amount {
        self.reserve_total
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Identity, Amount)> + '_ {
        self.balances.iter().map(|(id, amount)| (id, *amount))
    }

    /// `None` if the balances overflow an `Amount`.
    pub fn balances_sum(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0 as Amount, |acc, v| acc.checked_add(*v))
    }

    pub(crate) fn undo_point(&self, identity: &Identity) -> SlotUndo {
        SlotUndo {
            slot: Some((identity.clone(), self.balances.get(identity).copied())),
            reserve_total: self.reserve_total,
            swept: self.swept,
        }
    }

    pub(crate) fn reserve_undo_point(&self) -> SlotUndo {
        SlotUndo {
            slot: None,
            reserve_total: self.reserve_total,
            swept: self.swept,
        }
    }

    pub(crate) fn rollback(&mut self, undo: SlotUndo) {
        match undo.slot {
            Some((identity, Some(amount))) => {
                self.balances.insert(identity, amount);
            }
            Some((identity, None)) => {
                self.balances.remove(&identity);
            }
            None => {}
        }
        self.reserve_total = undo.reserve_total;
        self.swept = undo.swept;
    }

    pub(crate) fn credit(&mut self, identity: &Identity, amount: Amount) -> Result<(), CustodyError> {
        let balance = self.balance_of(identity);
        let next_balance = balance.checked_add(amount).ok_or(CustodyError::Overflow)?;
        let next_reserve = self
            .reserve_total
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;
        self.balances.insert(identity.clone(), next_balance);
        self.reserve_total = next_reserve;
        Ok(())
    }

    pub(crate) fn debit(&mut self, identity: &Identity, amount: Amount) -> Result<(), CustodyError> {
        let available = self.balance_of(identity);
        if amount > available {
            return Err(CustodyError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        self.balances.insert(identity.clone(), available - amount);
        // After a sweep the reserve may already sit below the sum of balances.
        self.reserve_total = self.reserve_total.saturating_sub(amount);
        Ok(())
    }

    /// Empty the reserve without touching individual balances.
    pub(crate) fn drain_reserve(&mut self) {
        self.reserve_total = 0;
        self.swept = true;
    }

    pub(crate) fn from_parts(
        balances: BTreeMap<Identity, Amount>,
        reserve_total: Amount,
        swept: bool,
    ) -> Self {
        Self {
            balances,
            reserve_total,
            swept,
        }
    }
}

/// Point-in-time copy of everything the vault persists, committed to by
/// `state_root`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    #[serde(with = "crate::serde_amount::map")]
    pub balances: BTreeMap<Identity, Amount>,
    #[serde(with = "crate::serde_amount")]
    pub reserve_total: Amount,
    pub roles: RoleTable,
    pub paused: bool,
    pub limits: DepositLimits,
    pub next_seq: u64,
    #[serde(default)]
    pub swept: bool,
    pub state_root: String,
}

impl LedgerSnapshot {
    pub(crate) fn capture(
        ledger: &LedgerState,
        roles: &RoleTable,
        paused: bool,
        limits: DepositLimits,
        next_seq: u64,
    ) -> Self {
        let mut snapshot = Self {
            balances: ledger.balances.clone(),
            reserve_total: ledger.reserve_total,
            roles: roles.clone(),
            paused,
            limits,
            next_seq,
            swept: ledger.swept,
            state_root: String::new(),
        };
        snapshot.state_root = hex::encode(snapshot.compute_root());
        snapshot
    }

    /// Recompute the root from the snapshot's contents, ignoring `state_root`.
    pub fn compute_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::new();
        for (identity, amount) in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"bal");
            hasher.update((identity.len() as u64).to_le_bytes());
            hasher.update(identity.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for (identity, roles) in self.roles.entries() {
            for role in roles {
                let mut hasher = Sha256::new();
                hasher.update(b"role");
                hasher.update((identity.len() as u64).to_le_bytes());
                hasher.update(identity.as_bytes());
                hasher.update(role.as_str().as_bytes());
                leaves.push(hasher.finalize().into());
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(b"meta");
        hasher.update(self.reserve_total.to_le_bytes());
        hasher.update([self.paused as u8, self.swept as u8]);
        hasher.update(self.limits.min_deposit.to_le_bytes());
        hasher.update(self.limits.max_deposit.to_le_bytes());
        hasher.update(self.next_seq.to_le_bytes());
        leaves.push(hasher.finalize().into());
        build_merkle(leaves)
    }

    pub fn verify_root(&self) -> Result<(), SnapshotError> {
        let computed = hex::encode(self.compute_root());
        if computed != self.state_root {
            return Err(SnapshotError::RootMismatch {
                expected: self.state_root.clone(),
                computed,
            });
        }
        Ok(())
    }
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"node");
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Pairwise reduction; an odd level pairs its last node with itself. The
/// `meta` leaf is always present, so `level` is never empty.
fn build_merkle(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| node_hash(&pair[0], pair.last().unwrap_or(&pair[0])))
            .collect();
    }
    level.first().copied().unwrap_or_default()
}
