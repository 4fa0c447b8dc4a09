use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{Amount, Identity, UNIT};

pub const DEFAULT_MIN_DEPOSIT: Amount = UNIT / 100; // 0.01
pub const DEFAULT_MAX_DEPOSIT: Amount = 100 * UNIT;

/// Deposit floor and ceiling, inclusive.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositLimits {
    #[serde(with = "crate::serde_amount")]
    pub min_deposit: Amount,
    #[serde(with = "crate::serde_amount")]
    pub max_deposit: Amount,
}

impl DepositLimits {
    pub fn new(min_deposit: Amount, max_deposit: Amount) -> Result<Self, ConfigError> {
        if min_deposit == 0 {
            return Err(ConfigError::ZeroMinimum);
        }
        if min_deposit > max_deposit {
            return Err(ConfigError::InvertedLimits {
                minimum: min_deposit,
                maximum: max_deposit,
            });
        }
        Ok(Self {
            min_deposit,
            max_deposit,
        })
    }
}

impl Default for DepositLimits {
    fn default() -> Self {
        Self {
            min_deposit: DEFAULT_MIN_DEPOSIT,
            max_deposit: DEFAULT_MAX_DEPOSIT,
        }
    }
}

/// Inputs read once when a vault is constructed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultConfig {
    pub initial_admin: Identity,
    #[serde(with = "crate::serde_amount", default = "default_min_deposit")]
    pub min_deposit: Amount,
    #[serde(with = "crate::serde_amount", default = "default_max_deposit")]
    pub max_deposit: Amount,
}

fn default_min_deposit() -> Amount {
    DEFAULT_MIN_DEPOSIT
}

fn default_max_deposit() -> Amount {
    DEFAULT_MAX_DEPOSIT
}

impl VaultConfig {
    pub fn new(initial_admin: impl Into<Identity>) -> Self {
        Self {
            initial_admin: initial_admin.into(),
            min_deposit: DEFAULT_MIN_DEPOSIT,
            max_deposit: DEFAULT_MAX_DEPOSIT,
        }
    }

    pub fn with_limits(mut self, min_deposit: Amount, max_deposit: Amount) -> Self {
        self.min_deposit = min_deposit;
        self.max_deposit = max_deposit;
        self
    }

    pub fn validate(&self) -> Result<DepositLimits, ConfigError> {
        if self.initial_admin.trim().is_empty() {
            return Err(ConfigError::MissingAdmin);
        }
        DepositLimits::new(self.min_deposit, self.max_deposit)
    }
}
