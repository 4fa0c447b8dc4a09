use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use custody_core::{
    ConfigError, CustodyVault, Identity, LedgerSnapshot, MemoryJournal, Record, SnapshotError,
    TracingSink, VaultConfig,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::rail::{RailBook, SimulatedRail};

pub const STATE_VERSION: u8 = 1;

pub type CliVault = CustodyVault<SimulatedRail, (MemoryJournal, TracingSink)>;

/// Everything persisted between CLI invocations.
#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u8,
    snapshot: LedgerSnapshot,
    rail: RailBook,
    #[serde(default)]
    nonces: BTreeMap<Identity, u64>,
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: malformed state file: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} already exists (pass --force to overwrite)")]
    Exists(PathBuf),
    #[error("unsupported state file version {0}")]
    Version(u8),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A vault loaded from (and saved back to) a state file.
pub struct Session {
    pub vault: CliVault,
    journal: MemoryJournal,
    nonces: BTreeMap<Identity, u64>,
    path: PathBuf,
}

impl Session {
    pub fn create(path: &Path, config: VaultConfig, force: bool) -> Result<Self, StateError> {
        if path.exists() && !force {
            return Err(StateError::Exists(path.to_path_buf()));
        }
        let journal = MemoryJournal::new();
        let vault = CustodyVault::new(config, SimulatedRail::default(), (journal.clone(), TracingSink))?;
        Ok(Self {
            vault,
            journal,
            nonces: BTreeMap::new(),
            path: path.to_path_buf(),
        })
    }

    pub fn open(path: &Path) -> Result<Self, StateError> {
        let bytes = fs::read(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: StateFile = serde_json::from_slice(&bytes).map_err(|source| StateError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if state.version != STATE_VERSION {
            return Err(StateError::Version(state.version));
        }
        let journal = MemoryJournal::from_records(state.records);
        let vault = CustodyVault::restore(
            state.snapshot,
            SimulatedRail::new(state.rail),
            (journal.clone(), TracingSink),
        )?;
        tracing::debug!(path = %path.display(), "state loaded");
        Ok(Self {
            vault,
            journal,
            nonces: state.nonces,
            path: path.to_path_buf(),
        })
    }

    /// Write to a sibling temp file, then rename over the state file.
    pub fn save(&self) -> Result<(), StateError> {
        let state = StateFile {
            version: STATE_VERSION,
            snapshot: self.vault.snapshot(),
            rail: self.vault.rail().book(),
            nonces: self.nonces.clone(),
            records: self.journal.records(),
        };
        let json = serde_json::to_vec_pretty(&state).map_err(|source| StateError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    pub fn records(&self) -> Vec<Record> {
        self.journal.records()
    }

    /// Nonces must strictly increase per identity.
    pub fn accept_nonce(&mut self, identity: &Identity, nonce: u64) -> Result<(), AuthError> {
        let last = self.nonces.get(identity).copied().unwrap_or(0);
        if nonce <= last {
            return Err(AuthError::StaleNonce { got: nonce, last });
        }
        self.nonces.insert(identity.clone(), nonce);
        Ok(())
    }

    pub fn last_nonce(&self, identity: &Identity) -> u64 {
        self.nonces.get(identity).copied().unwrap_or(0)
    }
}
