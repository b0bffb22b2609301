use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use serde_json::Error as SerdeError;
use tracing::debug;

use crate::domain::{PersistedState, Session};

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "PiMinMaxer";
const APP_NAME: &str = "PiMinMaxer";
const STATE_FILE: &str = "state.json";

/// Blob storage for the persisted root. Implementations only move bytes;
/// callers decide what a failure means.
pub trait Storage: Send + Sync {
    /// A store that has never been written loads as the empty root.
    fn load(&self) -> Result<PersistedState, PersistLoadError>;
    fn save(&self, state: &PersistedState) -> Result<(), PersistSaveError>;
}

/// Pretty-printed JSON in the platform config directory, or an explicit path.
#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    path: Option<PathBuf>,
}

impl JsonFileStorage {
    pub fn in_config_dir() -> Self {
        Self { path: data_file() }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn data_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(STATE_FILE))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Result<PersistedState, PersistLoadError> {
        let path = self.path.as_ref().ok_or(PersistLoadError::StorageUnavailable)?;
        if !path.exists() {
            debug!(path = %path.display(), "no saved state yet");
            return Ok(PersistedState::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistSaveError> {
        let path = self.path.as_ref().ok_or(PersistSaveError::StorageUnavailable)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        // Readers only ever see a complete file: write beside it, then swap.
        let staging = staging_path(path);
        fs::write(&staging, json)?;
        fs::rename(&staging, path)?;
        debug!(path = %path.display(), sessions = state.sessions.len(), "saved state");
        Ok(())
    }
}

/// Keeps the last saved root in memory. Used when no disk is wanted.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    saved: Mutex<Option<PersistedState>>,
    reject_saves: bool,
}

impl MemoryStorage {
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            saved: Mutex::new(Some(state)),
            reject_saves: false,
        }
    }

    /// Storage whose every save fails, for exercising the failure path.
    pub fn read_only() -> Self {
        Self {
            saved: Mutex::new(None),
            reject_saves: true,
        }
    }

    pub fn snapshot(&self) -> Option<PersistedState> {
        self.saved.lock().ok().and_then(|saved| saved.clone())
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<PersistedState, PersistLoadError> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| PersistLoadError::StorageUnavailable)?;
        Ok(saved.clone().unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistSaveError> {
        if self.reject_saves {
            return Err(PersistSaveError::StorageUnavailable);
        }
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| PersistSaveError::StorageUnavailable)?;
        *saved = Some(state.clone());
        Ok(())
    }
}

/// Human-readable, lossless dump of one session.
pub fn export_session(session: &Session) -> Result<String, SerdeError> {
    serde_json::to_string_pretty(session)
}

/// `<name>.json` with path separators replaced, so the export always lands
/// in the target directory.
pub fn export_file_name(session: &Session) -> String {
    let name = session.name.trim().replace(['/', '\\'], "_");
    if name.is_empty() {
        "session.json".to_string()
    } else {
        format!("{name}.json")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistLoadError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistSaveError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
