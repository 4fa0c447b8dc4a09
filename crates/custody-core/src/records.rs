use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::{Amount, Identity};

/// Immutable log entry describing one state change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub seq: u64,
    pub kind: RecordKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    Deposited {
        identity: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    Withdrawn {
        identity: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    EmergencySwept {
        admin: Identity,
        recipient: Identity,
        #[serde(with = "crate::serde_amount")]
        amount: Amount,
    },
    /// The transfer following record `seq` failed and its state change was undone.
    Reverted {
        seq: u64,
        reason: String,
    },
    Paused {
        by: Identity,
    },
    Unpaused {
        by: Identity,
    },
    RoleGranted {
        identity: Identity,
        role: Role,
        by: Identity,
    },
    RoleRevoked {
        identity: Identity,
        role: Role,
        by: Identity,
    },
    LimitsUpdated {
        #[serde(with = "crate::serde_amount")]
        min_deposit: Amount,
        #[serde(with = "crate::serde_amount")]
        max_deposit: Amount,
        by: Identity,
    },
}

/// Append-only, ordered destination for [`Record`]s.
pub trait RecordSink {
    fn append(&self, record: Record);
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn append(&self, record: Record) {
        (**self).append(record)
    }
}

/// In-memory journal; cloning shares the underlying log.
#[derive(Clone, Debug, Default)]
pub struct MemoryJournal {
    entries: Arc<Mutex<Vec<Record>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a journal with previously persisted records.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(records)),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Record> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl RecordSink for MemoryJournal {
    fn append(&self, record: Record) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Emits every record as a structured `tracing` event under the
/// `custody::records` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn append(&self, record: Record) {
        match &record.kind {
            RecordKind::Reverted { seq, reason } => {
                tracing::warn!(target: "custody::records", seq = record.seq, reverted = seq, %reason, "record")
            }
            kind => tracing::info!(target: "custody::records", seq = record.seq, ?kind, "record"),
        }
    }
}

/// Fan a record out to two sinks, in order.
impl<A: RecordSink, B: RecordSink> RecordSink for (A, B) {
    fn append(&self, record: Record) {
        self.0.append(record.clone());
        self.1.append(record);
    }
}
