//! Define the interface for a storage engine and the in-memory implementation of that interface.

mod dashmapkv;
pub mod snapshot;

use std::path::PathBuf;

use serde::Deserialize;

pub use self::{
    dashmapkv::DashMapStorage,
    snapshot::{FileSnapshotStore, Snapshot, SnapshotStore},
};

/// A basic interface for a thread-safe key-value store that ensure consistent access to shared
/// data from multiple different threads.
///
/// The store keeps three independent namespaces: scalar values, absolute expiry instants in
/// milliseconds since the Unix epoch, and lists. Expiry is never applied by the store itself,
/// callers decide when a recorded instant makes a value stale. None of the operations fail.
pub trait KeyValueStorage: Clone + Send + Sync + 'static {
    /// Set the value of a key and overwrite any existing value at that key.
    fn set(&self, key: &str, value: String);

    /// Get the value of a key, if it exists. Otherwise, return `None`.
    fn get(&self, key: &str) -> Option<String>;

    /// Return `true` if the key has a value.
    fn exists(&self, key: &str) -> bool;

    /// Delete the value of a key, if it exists.
    fn remove(&self, key: &str);

    /// Atomically replace the value of a key with the result of `f`.
    ///
    /// `f` receives the current value, if there's one. When `f` fails, the stored value is left
    /// untouched and the error is returned. Otherwise, the new value is stored and returned.
    fn update<F, E>(&self, key: &str, f: F) -> Result<String, E>
    where
        F: FnOnce(Option<&str>) -> Result<String, E>;

    /// Record the instant at which the key expires.
    fn set_expiry(&self, key: &str, at_ms: i64);

    /// Get the instant at which the key expires, if there's one.
    fn get_expiry(&self, key: &str) -> Option<i64>;

    /// Delete the expiry of a key, if it exists.
    fn remove_expiry(&self, key: &str);

    /// Set the value of a key and, when `at_ms` is given, the instant at which it expires.
    ///
    /// Both are written as one step with respect to [`KeyValueStorage::get_unexpired`]. Without
    /// `at_ms` the recorded expiry, if any, is left in place.
    fn set_with_expiry(&self, key: &str, value: String, at_ms: Option<i64>);

    /// Get the value of a key unless its expiry lies before `now_ms`. An expired value is
    /// removed along with its expiry, in one step with respect to writers of the same key.
    fn get_unexpired(&self, key: &str, now_ms: i64) -> Option<String>;

    /// Prepend a value to the list at the key, creating the list if needed. Returns the new
    /// length of the list.
    fn push_front(&self, key: &str, value: String) -> usize;

    /// Append a value to the list at the key, creating the list if needed. Returns the new
    /// length of the list.
    fn push_back(&self, key: &str, value: String) -> usize;

    /// Copy the content of every namespace at a single point in time.
    fn snapshot(&self) -> Snapshot;
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the file that holds the snapshot taken by `SAVE`.
    pub snapshot_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("redis-lite.dat"),
        }
    }
}
