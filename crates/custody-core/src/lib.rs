//! Custodial balance ledger.
//!
//! Tracks per-depositor balances against a pooled reserve and mediates value
//! movement to and from external parties. Every value-moving operation runs
//! through the same guarded sequence in [`vault::CustodyVault`]:
//!
//! * admission against the [`access::PauseSwitch`],
//! * a non-reentrant [`guard::CallGuard`],
//! * validation, then the ledger update,
//! * a [`records::Record`] appended to the sink,
//! * and only then the call out to the [`transfer::ValueTransfer`] rail,
//!   with the ledger update undone if the rail refuses.
//!
//! Administrative operations (roles, pause, limits, emergency sweep) sit on
//! the same vault and are gated by the [`access::RoleTable`].

pub mod access;
pub mod config;
pub mod guard;
pub mod ledger;
pub mod records;
pub mod transfer;
pub mod vault;

mod error;

pub use access::{LedgerStatus, Role};
pub use config::{DepositLimits, VaultConfig};
pub use error::{ConfigError, CustodyError, SnapshotError};
pub use ledger::LedgerSnapshot;
pub use records::{MemoryJournal, Record, RecordKind, RecordSink, TracingSink};
pub use transfer::{TransferError, ValueTransfer};
pub use vault::CustodyVault;

pub type Identity = String;
pub type Amount = u128;

/// One whole unit of the custodied asset, in smallest units.
pub const UNIT: Amount = 1_000_000_000_000_000_000;

/// Amounts as decimal strings on the wire; integers are accepted on input.
pub mod serde_amount {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    use crate::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> de::Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer amount or its decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(v as Amount)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| E::custom("amount must be non-negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            v.trim().parse::<Amount>().map_err(E::custom)
        }
    }

    /// `BTreeMap<_, Amount>` with string-encoded values.
    pub mod map {
        use std::collections::BTreeMap;

        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use crate::Amount;

        #[derive(Serialize, Deserialize)]
        struct Wire(#[serde(with = "super")] Amount);

        pub fn serialize<K, S>(value: &BTreeMap<K, Amount>, serializer: S) -> Result<S::Ok, S::Error>
        where
            K: Serialize,
            S: Serializer,
        {
            serializer.collect_map(value.iter().map(|(k, v)| (k, Wire(*v))))
        }

        pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Amount>, D::Error>
        where
            K: Deserialize<'de> + Ord,
            D: Deserializer<'de>,
        {
            let wire = BTreeMap::<K, Wire>::deserialize(deserializer)?;
            Ok(wire.into_iter().map(|(k, Wire(v))| (k, v)).collect())
        }
    }
}
