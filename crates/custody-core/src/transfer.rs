//! Settlement rail seam.
//!
//! The vault never moves value itself. It asks a [`ValueTransfer`]
//! implementation to pull value from a depositor or push value to a
//! recipient, and treats every such call as fallible and potentially
//! re-entrant: an implementation is free to call back into the vault.

use std::sync::Arc;

use thiserror::Error;

use crate::{Amount, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{party} cannot cover {amount}")]
    InsufficientFunds { party: Identity, amount: Amount },
    #[error("recipient {0} rejected the transfer")]
    Rejected(Identity),
    #[error("rail unavailable: {0}")]
    Unavailable(String),
}

/// External value transfer primitive.
pub trait ValueTransfer {
    /// Move `amount` from `from` into custody.
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError>;

    /// Move `amount` out of custody to `to`.
    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError>;

    /// Value actually held in custody right now.
    fn held(&self) -> Amount;
}

impl<T: ValueTransfer + ?Sized> ValueTransfer for Arc<T> {
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        (**self).pull(from, amount)
    }

    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        (**self).push(to, amount)
    }

    fn held(&self) -> Amount {
        (**self).held()
    }
}

impl<T: ValueTransfer + ?Sized> ValueTransfer for &T {
    fn pull(&self, from: &Identity, amount: Amount) -> Result<(), TransferError> {
        (**self).pull(from, amount)
    }

    fn push(&self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        (**self).push(to, amount)
    }

    fn held(&self) -> Amount {
        (**self).held()
    }
}
