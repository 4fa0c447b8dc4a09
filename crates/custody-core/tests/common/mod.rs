#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use custody_core::{
    Amount, CustodyVault, Identity, MemoryJournal, TransferError, ValueTransfer, VaultConfig,
};

/// Wallet-backed rail: external balances per identity plus the custody pot.
#[derive(Default)]
pub struct WalletRail {
    inner: Mutex<RailState>,
}

#[derive(Default)]
struct RailState {
    wallets: BTreeMap<Identity, Amount>,
    held: Amount,
    blocked: Vec<Identity>,
}

impl WalletRail {
    pub fn fund(&self, who: &str, amount: Amount) {
        *self
            .inner
            .lock()
            .unwrap()
            .wallets
            .entry(who.to_string())
            .or_default() += amount;
    }

    pub fn wallet(&self, who: &str) -> Amount {
        self.inner.lock().unwrap().wallets.get(who).copied().unwrap_or(0)
    }

    /// Make every push to `who` fail.
    pub fn block(&self, who: &str) {
        self.inner.lock().unwrap().blocked.push(who.to_string());
    }
}

impl ValueTransfer for WalletRail {
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.inner.lock().unwrap();
        let wallet = state.wallets.entry(from.clone()).or_default();
        if *wallet < amount {
            return Err(TransferError::InsufficientFunds {
                party: from.clone(),
                amount,
            });
        }
        *wallet -= amount;
        state.held += amount;
        Ok(())
    }

    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        let mut state = self.inner.lock().unwrap();
        if state.blocked.contains(to) {
            return Err(TransferError::Rejected(to.clone()));
        }
        if state.held < amount {
            return Err(TransferError::Unavailable(format!("rail holds {}", state.held)));
        }
        state.held -= amount;
        *state.wallets.entry(to.clone()).or_default() += amount;
        Ok(())
    }

    fn held(&self) -> Amount {
        self.inner.lock().unwrap().held
    }
}

pub type Vault = CustodyVault<Arc<WalletRail>, MemoryJournal>;

pub const ADMIN: &str = "0xadmin";

pub fn id(s: &str) -> Identity {
    s.to_string()
}

pub fn vault_with(min: Amount, max: Amount) -> (Vault, Arc<WalletRail>, MemoryJournal) {
    let rail = Arc::new(WalletRail::default());
    let journal = MemoryJournal::new();
    let vault = CustodyVault::new(
        VaultConfig::new(ADMIN).with_limits(min, max),
        rail.clone(),
        journal.clone(),
    )
    .unwrap();
    (vault, rail, journal)
}
