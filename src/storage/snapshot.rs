//! Point-in-time copies of the storage and the hook that persists them.

use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Error returned when saving or loading a snapshot
#[derive(Error, Debug)]
pub enum Error {
    /// Error from I/O operations.
    #[error("I/O error - {0}")]
    Io(#[from] io::Error),

    /// Error from serialization and deserialization.
    #[error("Serialization error - {0}")]
    Serialization(#[from] bincode::Error),
}

/// The content of every storage namespace at one point in time.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Scalar values.
    pub values: HashMap<String, String>,
    /// Absolute expiry instants in milliseconds since the Unix epoch.
    pub expiries: HashMap<String, i64>,
    /// Lists.
    pub lists: HashMap<String, VecDeque<String>>,
}

/// A place where snapshots are kept between runs of the server.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Persist the snapshot, replacing the one that was previously saved.
    fn save(&self, snapshot: &Snapshot) -> Result<(), Error>;

    /// Read back the last saved snapshot.
    fn load(&self) -> Result<Snapshot, Error>;
}

/// Keeps the snapshot in a single bincode encoded file.
///
/// Saves through the same store, or any of its clones, run one at a time.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    // Held while the temporary file is written and renamed
    writing: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    /// Create a store that reads and writes the file at the given path.
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            writing: Arc::default(),
        }
    }

    /// Get the path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), Error> {
        let _writing = self.writing.lock();
        // Write to a temporary file first so a crash never leaves a half written snapshot
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, "saved snapshot");
        Ok(())
    }

    fn load(&self) -> Result<Snapshot, Error> {
        let reader = BufReader::new(File::open(&self.path)?);
        let snapshot = bincode::deserialize_from(reader)?;
        debug!(path = ?self.path, "loaded snapshot");
        Ok(snapshot)
    }
}
