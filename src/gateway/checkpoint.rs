use crate::constants::CHECKPOINT_DIR;
use crate::error::{ArchiverError, Result};
use crate::gateway::block_file::write_atomic;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    run_id: Uuid,
    state: T,
}

/// Single-writer JSON checkpoint for one stage of a run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    run_id: Uuid,
}

impl CheckpointStore {
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            path: root.join(CHECKPOINT_DIR).join(file_name),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the saved state. A checkpoint from another format version is
    /// ignored; an unreadable one is an error.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<T> = serde_json::from_str(&raw).map_err(|e| {
            ArchiverError::Checkpoint(format!("{} is corrupt: {}", self.path.display(), e))
        })?;
        if envelope.version != CHECKPOINT_VERSION {
            warn!(
                "Ignoring checkpoint {} with version {}",
                self.path.display(),
                envelope.version
            );
            return Ok(None);
        }
        debug!(
            "Loaded checkpoint {} saved at {} by run {}",
            self.path.display(),
            envelope.saved_at,
            envelope.run_id
        );
        Ok(Some(envelope.state))
    }

    pub fn save<T: Serialize>(&self, state: &T) -> Result<()> {
        let envelope = Envelope {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            run_id: self.run_id,
            state,
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
