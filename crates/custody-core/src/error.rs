use thiserror::Error;

use crate::access::Role;
use crate::transfer::TransferError;
use crate::{Amount, Identity};

/// Failure of a custody operation. A returned error always means no ledger,
/// role, or pause state was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    /// Deposit smaller than the configured floor.
    #[error("deposit of {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    /// Deposit larger than the configured ceiling.
    #[error("deposit of {amount} is above the maximum of {maximum}")]
    AboveMaximum { amount: Amount, maximum: Amount },

    /// Withdrawal larger than the caller's balance.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("amount must be non-zero")]
    ZeroAmount,

    /// A guarded operation was entered while another one was still running.
    #[error("re-entrant call rejected")]
    ReentrantCall,

    #[error("ledger is paused")]
    Paused,

    #[error("ledger is already paused")]
    AlreadyPaused,

    #[error("ledger is not paused")]
    NotPaused,

    #[error("{caller} lacks the {role} role")]
    Unauthorized { caller: Identity, role: Role },

    /// Revoking or renouncing would leave no admin behind.
    #[error("cannot remove the last admin")]
    LastAdminProtected,

    /// The settlement rail refused the transfer; the operation was rolled back.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    #[error("nothing held to sweep")]
    NothingToSweep,

    #[error("invalid deposit limits: minimum {minimum}, maximum {maximum}")]
    InvalidLimits { minimum: Amount, maximum: Amount },

    #[error("arithmetic overflow")]
    Overflow,
}

/// Rejected vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("initial admin identity is empty")]
    MissingAdmin,
    #[error("minimum deposit must be non-zero")]
    ZeroMinimum,
    #[error("minimum deposit {minimum} exceeds maximum {maximum}")]
    InvertedLimits { minimum: Amount, maximum: Amount },
}

/// Rejected snapshot on restore.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("state root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },
    #[error("balances sum to {balances} but reserve is {reserve}")]
    ReserveMismatch { balances: Amount, reserve: Amount },
    #[error("reserve of {reserve} exceeds the {held} held by the rail")]
    ReserveExceedsHeld { reserve: Amount, held: Amount },
    #[error("snapshot carries no admin")]
    NoAdmin,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
