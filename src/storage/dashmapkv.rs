use std::{collections::VecDeque, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{KeyValueStorage, Snapshot, SnapshotStore};

/// An in-memory storage whose namespaces are sharded concurrent maps.
///
/// Cloning gives out another handle to the same data. Point updates only lock the shard that
/// holds the key, so operations on different keys rarely contend. Every mutation also holds
/// the shared side of a checkpoint lock, which `snapshot` takes exclusively to copy the maps
/// while no mutation is in flight.
#[derive(Default, Clone)]
pub struct DashMapStorage {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    values: DashMap<String, String>,
    expiries: DashMap<String, i64>,
    lists: DashMap<String, VecDeque<String>>,
    checkpoint: RwLock<()>,
}

impl DashMapStorage {
    /// Create a storage that holds the content of the given snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let Snapshot {
            values,
            expiries,
            lists,
        } = snapshot;
        Self {
            inner: Arc::new(Shared {
                values: values.into_iter().collect(),
                expiries: expiries.into_iter().collect(),
                lists: lists.into_iter().collect(),
                checkpoint: RwLock::new(()),
            }),
        }
    }

    /// Create a storage from the snapshot kept in the given store. Falls back to an empty
    /// storage when the snapshot can't be loaded.
    pub fn open(store: &dyn SnapshotStore) -> Self {
        match store.load() {
            Ok(snapshot) => {
                info!(
                    values = snapshot.values.len(),
                    lists = snapshot.lists.len(),
                    "restored storage from snapshot"
                );
                Self::from_snapshot(snapshot)
            }
            Err(err) => {
                warn!(cause = %err, "could not load snapshot, starting with empty storage");
                Self::default()
            }
        }
    }

    fn push<F>(&self, key: &str, push: F) -> usize
    where
        F: FnOnce(&mut VecDeque<String>),
    {
        let _guard = self.inner.checkpoint.read();
        // The entry holds the shard's write lock until the length has been read
        let mut list = self.inner.lists.entry(key.to_string()).or_default();
        push(list.value_mut());
        list.len()
    }
}

impl KeyValueStorage for DashMapStorage {
    fn set(&self, key: &str, value: String) {
        let _guard = self.inner.checkpoint.read();
        self.inner.values.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.inner.values.get(key).map(|e| e.value().clone())
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.values.contains_key(key)
    }

    fn remove(&self, key: &str) {
        let _guard = self.inner.checkpoint.read();
        self.inner.values.remove(key);
    }

    fn update<F, E>(&self, key: &str, f: F) -> Result<String, E>
    where
        F: FnOnce(Option<&str>) -> Result<String, E>,
    {
        let _guard = self.inner.checkpoint.read();
        match self.inner.values.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let value = f(Some(entry.get().as_str()))?;
                entry.insert(value.clone());
                Ok(value)
            }
            Entry::Vacant(entry) => {
                let value = f(None)?;
                entry.insert(value.clone());
                Ok(value)
            }
        }
    }

    fn set_expiry(&self, key: &str, at_ms: i64) {
        let _guard = self.inner.checkpoint.read();
        self.inner.expiries.insert(key.to_string(), at_ms);
    }

    fn get_expiry(&self, key: &str) -> Option<i64> {
        self.inner.expiries.get(key).map(|e| *e.value())
    }

    fn remove_expiry(&self, key: &str) {
        let _guard = self.inner.checkpoint.read();
        self.inner.expiries.remove(key);
    }

    fn set_with_expiry(&self, key: &str, value: String, at_ms: Option<i64>) {
        let _guard = self.inner.checkpoint.read();
        // The value's shard stays locked until the expiry is written. Every operation that
        // touches both maps locks `values` before `expiries`.
        let mut entry = self.inner.values.entry(key.to_string()).or_default();
        *entry.value_mut() = value;
        if let Some(at_ms) = at_ms {
            self.inner.expiries.insert(key.to_string(), at_ms);
        }
    }

    fn get_unexpired(&self, key: &str, now_ms: i64) -> Option<String> {
        let _guard = self.inner.checkpoint.read();
        match self.inner.values.entry(key.to_string()) {
            Entry::Occupied(entry) => match self.get_expiry(key) {
                Some(at_ms) if now_ms > at_ms => {
                    entry.remove();
                    self.inner.expiries.remove(key);
                    None
                }
                _ => Some(entry.get().clone()),
            },
            Entry::Vacant(_) => None,
        }
    }

    fn push_front(&self, key: &str, value: String) -> usize {
        self.push(key, |list| list.push_front(value))
    }

    fn push_back(&self, key: &str, value: String) -> usize {
        self.push(key, |list| list.push_back(value))
    }

    fn snapshot(&self) -> Snapshot {
        let _guard = self.inner.checkpoint.write();
        Snapshot {
            values: self
                .inner
                .values
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            expiries: self
                .inner
                .expiries
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            lists: self
                .inner
                .lists
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use proptest::prelude::*;
    use rayon::prelude::*;

    use super::*;
    use crate::storage::{snapshot, FileSnapshotStore};

    #[test]
    fn set_then_get_returns_the_value() {
        let kv = DashMapStorage::default();
        proptest!(|(key in ".*", value in ".*")| {
            kv.set(&key, value.clone());
            prop_assert_eq!(kv.get(&key), Some(value));
            prop_assert!(kv.exists(&key));
        });
    }

    #[test]
    fn set_overwrites_value() {
        let kv = DashMapStorage::default();
        kv.set("foo", "bar".into());
        kv.set("foo", "baz".into());
        assert_eq!(kv.get("foo"), Some("baz".into()));
    }

    #[test]
    fn remove_deletes_value_only() {
        let kv = DashMapStorage::default();
        kv.set("foo", "bar".into());
        kv.set_expiry("foo", 42);
        kv.remove("foo");

        assert!(!kv.exists("foo"));
        assert_eq!(kv.get("foo"), None);
        assert_eq!(kv.get_expiry("foo"), Some(42));

        kv.remove_expiry("foo");
        assert_eq!(kv.get_expiry("foo"), None);
    }

    #[test]
    fn update_stores_result_or_keeps_value_on_error() {
        let kv = DashMapStorage::default();

        let created: Result<String, ()> = kv.update("n", |v| {
            assert_eq!(v, None);
            Ok("1".into())
        });
        assert_eq!(created, Ok("1".into()));

        let failed: Result<String, &str> = kv.update("n", |_| Err("nope"));
        assert_eq!(failed, Err("nope"));
        assert_eq!(kv.get("n"), Some("1".into()));

        let failed: Result<String, &str> = kv.update("missing", |_| Err("nope"));
        assert_eq!(failed, Err("nope"));
        assert!(!kv.exists("missing"));
    }

    #[test]
    fn set_with_expiry_keeps_old_expiry_without_new_one() {
        let kv = DashMapStorage::default();
        kv.set_with_expiry("foo", "bar".into(), Some(42));
        assert_eq!(kv.get("foo"), Some("bar".into()));
        assert_eq!(kv.get_expiry("foo"), Some(42));

        kv.set_with_expiry("foo", "baz".into(), None);
        assert_eq!(kv.get("foo"), Some("baz".into()));
        assert_eq!(kv.get_expiry("foo"), Some(42));
    }

    #[test]
    fn get_unexpired_removes_stale_value() {
        let kv = DashMapStorage::default();
        kv.set_with_expiry("foo", "bar".into(), Some(100));

        assert_eq!(kv.get_unexpired("foo", 100), Some("bar".into()));
        assert_eq!(kv.get_unexpired("foo", 101), None);
        assert!(!kv.exists("foo"));
        assert_eq!(kv.get_expiry("foo"), None);
    }

    #[test]
    fn get_unexpired_leaves_expiry_of_missing_value() {
        let kv = DashMapStorage::default();
        kv.set_expiry("foo", 100);
        assert_eq!(kv.get_unexpired("foo", 200), None);
        assert_eq!(kv.get_expiry("foo"), Some(100));
    }

    #[test]
    fn get_unexpired_never_undoes_concurrent_set() {
        let kv = DashMapStorage::default();
        let now = 1_000;

        for _ in 0..2_000 {
            kv.set_with_expiry("key", "old".into(), Some(now - 1));
            let done = AtomicBool::new(false);

            thread::scope(|s| {
                s.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        kv.get_unexpired("key", now);
                    }
                });
                kv.set_with_expiry("key", "new".into(), Some(now + 100));
                done.store(true, Ordering::SeqCst);
            });

            assert_eq!(kv.get("key"), Some("new".into()));
            assert_eq!(kv.get_expiry("key"), Some(now + 100));
        }
    }

    #[test]
    fn push_returns_list_length() {
        let kv = DashMapStorage::default();
        assert_eq!(kv.push_back("list", "b".into()), 1);
        assert_eq!(kv.push_front("list", "a".into()), 2);
        assert_eq!(kv.push_back("list", "c".into()), 3);

        let snapshot = kv.snapshot();
        assert_eq!(
            snapshot.lists.get("list"),
            Some(&VecDeque::from(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn lists_and_values_are_separate_namespaces() {
        let kv = DashMapStorage::default();
        kv.set("key", "value".into());
        assert_eq!(kv.push_back("key", "item".into()), 1);
        assert_eq!(kv.get("key"), Some("value".into()));
    }

    #[test]
    fn concurrent_pushes_are_not_lost() {
        let kv = DashMapStorage::default();
        let n = 10_000;

        (0..n).into_par_iter().for_each(|i| {
            if i % 2 == 0 {
                kv.push_front("list", i.to_string());
            } else {
                kv.push_back("list", i.to_string());
            }
        });

        assert_eq!(kv.push_back("list", "last".into()), n + 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let kv = DashMapStorage::default();
        let n = 1_000;

        (0..n).into_par_iter().for_each(|_| {
            let _: Result<String, ()> = kv.update("counter", |v| {
                let current: i64 = v.map(|v| v.parse().unwrap()).unwrap_or(0);
                Ok((current + 1).to_string())
            });
        });

        assert_eq!(kv.get("counter"), Some(n.to_string()));
    }

    #[test]
    fn snapshot_sees_whole_pushes_only() {
        let kv = DashMapStorage::default();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..5_000 {
                    kv.set(&format!("key{}", i), i.to_string());
                    kv.push_back("list", i.to_string());
                }
                done.store(true, Ordering::SeqCst);
            });

            while !done.load(Ordering::SeqCst) {
                let snapshot = kv.snapshot();
                let len = snapshot.lists.get("list").map(|l| l.len()).unwrap_or(0);
                // The writer sets a value before pushing, so a snapshot never holds more list
                // items than values
                assert!(len <= snapshot.values.len());
                assert!(snapshot.values.len() <= len + 1);
            }
        });
    }

    #[test]
    fn open_restores_saved_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("dump.dat"));

        let kv = DashMapStorage::default();
        kv.set("foo", "bar".into());
        kv.set_expiry("foo", 1234);
        kv.push_back("list", "item".into());
        store.save(&kv.snapshot()).unwrap();

        let restored = DashMapStorage::open(&store);
        assert_eq!(restored.get("foo"), Some("bar".into()));
        assert_eq!(restored.get_expiry("foo"), Some(1234));
        assert_eq!(restored.push_back("list", "another".into()), 2);
    }

    #[test]
    fn open_falls_back_to_empty_storage() {
        struct Broken;

        impl SnapshotStore for Broken {
            fn save(&self, _: &Snapshot) -> Result<(), snapshot::Error> {
                Ok(())
            }

            fn load(&self) -> Result<Snapshot, snapshot::Error> {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupted").into())
            }
        }

        let kv = DashMapStorage::open(&Broken);
        assert_eq!(kv.snapshot(), Snapshot::default());
    }
}
