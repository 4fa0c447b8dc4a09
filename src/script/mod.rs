use std::fmt;

use custody_core::{
    Amount, CustodyError, CustodyVault, Identity, RecordSink, Role, ValueTransfer,
};
use serde::{Deserialize, Serialize};

/// One call against the vault, as written in scripts and signed envelopes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultAction {
    Deposit {
        #[serde(with = "custody_core::serde_amount")]
        amount: Amount,
    },
    Withdraw {
        #[serde(with = "custody_core::serde_amount")]
        amount: Amount,
    },
    WithdrawAll,
    EmergencySweep {
        recipient: Identity,
    },
    Pause,
    Unpause,
    GrantRole {
        identity: Identity,
        role: Role,
    },
    RevokeRole {
        identity: Identity,
        role: Role,
    },
    RenounceRole {
        role: Role,
    },
    SetDepositLimits {
        #[serde(with = "custody_core::serde_amount")]
        min_deposit: Amount,
        #[serde(with = "custody_core::serde_amount")]
        max_deposit: Amount,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    PaidOut(Amount),
    RoleChanged(bool),
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Done => f.write_str("ok"),
            ActionOutcome::PaidOut(amount) => write!(f, "ok, paid out {amount}"),
            ActionOutcome::RoleChanged(true) => f.write_str("ok, role updated"),
            ActionOutcome::RoleChanged(false) => f.write_str("ok, no change"),
        }
    }
}

impl VaultAction {
    pub fn apply<T, S>(
        &self,
        vault: &CustodyVault<T, S>,
        caller: &Identity,
    ) -> Result<ActionOutcome, CustodyError>
    where
        T: ValueTransfer,
        S: RecordSink,
    {
        match self {
            VaultAction::Deposit { amount } => vault.deposit(caller, *amount).map(|_| ActionOutcome::Done),
            VaultAction::Withdraw { amount } => vault
                .withdraw(caller, *amount)
                .map(|_| ActionOutcome::PaidOut(*amount)),
            VaultAction::WithdrawAll => vault.withdraw_all(caller).map(ActionOutcome::PaidOut),
            VaultAction::EmergencySweep { recipient } => vault
                .emergency_sweep(caller, recipient)
                .map(ActionOutcome::PaidOut),
            VaultAction::Pause => vault.pause(caller).map(|_| ActionOutcome::Done),
            VaultAction::Unpause => vault.unpause(caller).map(|_| ActionOutcome::Done),
            VaultAction::GrantRole { identity, role } => vault
                .grant_role(caller, identity, *role)
                .map(ActionOutcome::RoleChanged),
            VaultAction::RevokeRole { identity, role } => vault
                .revoke_role(caller, identity, *role)
                .map(ActionOutcome::RoleChanged),
            VaultAction::RenounceRole { role } => vault
                .renounce_role(caller, *role)
                .map(ActionOutcome::RoleChanged),
            VaultAction::SetDepositLimits {
                min_deposit,
                max_deposit,
            } => vault
                .set_deposit_limits(caller, *min_deposit, *max_deposit)
                .map(|_| ActionOutcome::Done),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptStep {
    pub caller: Identity,
    pub action: VaultAction,
}

#[derive(Debug)]
pub struct StepReport {
    pub index: usize,
    pub caller: Identity,
    pub action: VaultAction,
    pub outcome: Result<ActionOutcome, CustodyError>,
}

/// Apply each step independently; a failing step does not stop the run.
pub fn run_script<T, S>(vault: &CustodyVault<T, S>, steps: &[ScriptStep]) -> Vec<StepReport>
where
    T: ValueTransfer,
    S: RecordSink,
{
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let outcome = step.action.apply(vault, &step.caller);
            if let Err(err) = &outcome {
                tracing::debug!(index, caller = %step.caller, error = %err, "script step failed");
            }
            StepReport {
                index,
                caller: step.caller.clone(),
                action: step.action.clone(),
                outcome,
            }
        })
        .collect()
}
