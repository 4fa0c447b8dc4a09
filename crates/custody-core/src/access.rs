//! Access/lifecycle gate: who may do what, and whether value may move.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CustodyError;
use crate::Identity;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Reassigns roles, sweeps, updates deposit limits.
    Admin,
    /// Pauses and unpauses.
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            other => Err(format!("unknown role {other:?} (expected admin or operator)")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Active,
    Paused,
}

/// Identity to capability-set table. Holds at least one admin once bootstrapped.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleTable {
    members: BTreeMap<Identity, BTreeSet<Role>>,
}

impl RoleTable {
    /// Table with `admin` holding both roles.
    pub fn bootstrap(admin: &Identity) -> Self {
        let mut table = Self::default();
        table.insert(admin, Role::Admin);
        table.insert(admin, Role::Operator);
        table
    }

    pub fn has_role(&self, identity: &Identity, role: Role) -> bool {
        self.members
            .get(identity)
            .map_or(false, |roles| roles.contains(&role))
    }

    pub fn require(&self, identity: &Identity, role: Role) -> Result<(), CustodyError> {
        if self.has_role(identity, role) {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized {
                caller: identity.clone(),
                role,
            })
        }
    }

    pub fn holders(&self, role: Role) -> impl Iterator<Item = &Identity> + '_ {
        self.members
            .iter()
            .filter(move |(_, roles)| roles.contains(&role))
            .map(|(identity, _)| identity)
    }

    pub fn count(&self, role: Role) -> usize {
        self.holders(role).count()
    }

    pub fn entries(&self) -> &BTreeMap<Identity, BTreeSet<Role>> {
        &self.members
    }

    /// Returns `false` if the role was already held.
    pub fn insert(&mut self, identity: &Identity, role: Role) -> bool {
        self.members.entry(identity.clone()).or_default().insert(role)
    }

    /// Returns `false` if the role was not held. Refuses to drop the last admin.
    pub fn remove(&mut self, identity: &Identity, role: Role) -> Result<bool, CustodyError> {
        if !self.has_role(identity, role) {
            return Ok(false);
        }
        if role == Role::Admin && self.count(Role::Admin) == 1 {
            return Err(CustodyError::LastAdminProtected);
        }
        if let Some(roles) = self.members.get_mut(identity) {
            roles.remove(&role);
            if roles.is_empty() {
                self.members.remove(identity);
            }
        }
        Ok(true)
    }
}

/// Process-wide pause flag.
#[derive(Debug, Default)]
pub struct PauseSwitch {
    paused: AtomicBool,
}

impl PauseSwitch {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn ensure_active(&self) -> Result<(), CustodyError> {
        if self.is_paused() {
            Err(CustodyError::Paused)
        } else {
            Ok(())
        }
    }

    /// Active -> Paused. Fails with `AlreadyPaused` otherwise.
    pub fn pause(&self) -> Result<(), CustodyError> {
        self.paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| CustodyError::AlreadyPaused)
    }

    /// Paused -> Active. Fails with `NotPaused` otherwise.
    pub fn unpause(&self) -> Result<(), CustodyError> {
        self.paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| CustodyError::NotPaused)
    }

    pub fn status(&self) -> LedgerStatus {
        if self.is_paused() {
            LedgerStatus::Paused
        } else {
            LedgerStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_grants_admin_and_operator() {
        let table = RoleTable::bootstrap(&"root".to_string());
        assert!(table.has_role(&"root".into(), Role::Admin));
        assert!(table.has_role(&"root".into(), Role::Operator));
        assert_eq!(table.count(Role::Admin), 1);
    }

    #[test]
    fn last_admin_cannot_be_removed() {
        let mut table = RoleTable::bootstrap(&"root".to_string());
        let err = table.remove(&"root".into(), Role::Admin).unwrap_err();
        assert_eq!(err, CustodyError::LastAdminProtected);
        assert!(table.has_role(&"root".into(), Role::Admin));

        table.insert(&"backup".into(), Role::Admin);
        assert!(table.remove(&"root".into(), Role::Admin).unwrap());
        assert_eq!(table.holders(Role::Admin).collect::<Vec<_>>(), vec!["backup"]);
    }

    #[test]
    fn removing_absent_role_is_noop() {
        let mut table = RoleTable::bootstrap(&"root".to_string());
        assert!(!table.remove(&"nobody".into(), Role::Operator).unwrap());
        assert_eq!(table, RoleTable::bootstrap(&"root".to_string()));
    }

    #[test]
    fn pause_transitions_are_strict() {
        let switch = PauseSwitch::default();
        assert_eq!(switch.unpause(), Err(CustodyError::NotPaused));
        switch.pause().unwrap();
        assert_eq!(switch.status(), LedgerStatus::Paused);
        assert_eq!(switch.pause(), Err(CustodyError::AlreadyPaused));
        assert_eq!(switch.ensure_active(), Err(CustodyError::Paused));
        switch.unpause().unwrap();
        assert!(switch.ensure_active().is_ok());
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("owner".parse::<Role>().is_err());
    }
}
