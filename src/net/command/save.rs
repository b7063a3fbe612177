use std::sync::Arc;

use tracing::{error, info};

use super::{Handler, OK};
use crate::storage::{KeyValueStorage, SnapshotStore};

const SAVE_FAILED: &str = "ERR failed to save snapshot";

/// `SAVE`
///
/// Takes a consistent snapshot of the storage and hands it to the snapshot store.
pub struct Save {
    snapshots: Arc<dyn SnapshotStore>,
}

impl Save {
    /// Create the handler that persists snapshots to the given store.
    pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { snapshots }
    }
}

impl<KV> Handler<KV> for Save
where
    KV: KeyValueStorage,
{
    fn execute(&self, storage: &KV, _: &[String]) -> String {
        let snapshot = storage.snapshot();
        match self.snapshots.save(&snapshot) {
            Ok(()) => {
                info!(
                    values = snapshot.values.len(),
                    lists = snapshot.lists.len(),
                    "saved snapshot"
                );
                OK.to_string()
            }
            Err(err) => {
                error!(cause = %err, "failed to save snapshot");
                SAVE_FAILED.to_string()
            }
        }
    }
}
