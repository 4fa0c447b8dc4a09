use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use custody_core::{Amount, Identity, TransferError, ValueTransfer};
use serde::{Deserialize, Serialize};

/// External wallet balances and the value sitting in custody.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RailBook {
    #[serde(with = "custody_core::serde_amount::map")]
    pub wallets: BTreeMap<Identity, Amount>,
    #[serde(with = "custody_core::serde_amount")]
    pub held: Amount,
}

/// Local stand-in for an on-chain settlement layer: deposits pull from the
/// depositor's wallet, withdrawals credit it.
#[derive(Debug, Default)]
pub struct SimulatedRail {
    book: Mutex<RailBook>,
}

impl SimulatedRail {
    pub fn new(book: RailBook) -> Self {
        Self {
            book: Mutex::new(book),
        }
    }

    /// Credit an external wallet from outside the system.
    pub fn fund(&self, who: &Identity, amount: Amount) -> Result<Amount, TransferError> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let wallet = book.wallets.entry(who.clone()).or_default();
        *wallet = wallet
            .checked_add(amount)
            .ok_or_else(|| TransferError::Unavailable("wallet overflow".into()))?;
        Ok(*wallet)
    }

    pub fn wallet(&self, who: &Identity) -> Amount {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wallets
            .get(who)
            .copied()
            .unwrap_or(0)
    }

    pub fn book(&self) -> RailBook {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ValueTransfer for SimulatedRail {
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let available = book.wallets.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                party: from.clone(),
                amount,
            });
        }
        let held = book
            .held
            .checked_add(amount)
            .ok_or_else(|| TransferError::Unavailable("custody overflow".into()))?;
        book.wallets.insert(from.clone(), available - amount);
        book.held = held;
        Ok(())
    }

    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        if book.held < amount {
            return Err(TransferError::Unavailable(format!(
                "custody holds {}, cannot release {amount}",
                book.held
            )));
        }
        book.held -= amount;
        *book.wallets.entry(to.clone()).or_default() += amount;
        Ok(())
    }

    fn held(&self) -> Amount {
        self.book.lock().unwrap_or_else(PoisonError::into_inner).held
    }
}
