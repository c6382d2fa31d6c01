use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, SchemaError};

/// An ordered set of writes applied atomically on commit. `None` values are
/// deletes. Order is preserved so a later write to the same key wins.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.push((key, None));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.writes
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}

/// Read view of the backing store at a fixed commit version.
///
/// All iteration is ascending byte-lexicographic, which the codec arranges to
/// coincide with vertex-id order.
pub trait StoreSnapshot: Send {
    /// Commit version this snapshot observes.
    fn version(&self) -> u64;

    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Sorted key-value pairs whose keys start with `prefix`.
    fn scan<'a>(&'a self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

    /// Sorted key-value pairs starting at the first key `>= from`.
    fn seek<'a>(&'a self, from: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;
}

/// The consumed key-value backing store: snapshot reads plus atomic batch
/// commit with first-committer-wins conflict detection.
pub trait SnapshotStore: Send + Sync {
    fn snapshot(&self) -> Box<dyn StoreSnapshot>;

    /// Atomically applies `batch` on top of the current state.
    ///
    /// Fails with `ConcurrentSchemaWrite` when any key in the batch was
    /// committed after `base_version`, and with `CommitTimeout` when the
    /// store's write lock cannot be acquired within `timeout`.
    fn apply(&self, batch: WriteBatch, base_version: u64, timeout: Duration) -> Result<u64>;
}

#[derive(Default)]
struct MemStoreInner {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    // Last commit version that touched each key, for write-write conflicts.
    key_versions: HashMap<Vec<u8>, u64>,
    version: u64,
}

/// In-memory reference implementation of the backing store.
///
/// Snapshots share the underlying map through an `Arc`; `apply` copies on
/// write, so open snapshots keep observing their own version.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemStore {
    fn snapshot(&self) -> Box<dyn StoreSnapshot> {
        let inner = self.inner.read();
        Box::new(MemSnapshot {
            data: Arc::clone(&inner.data),
            version: inner.version,
        })
    }

    fn apply(&self, batch: WriteBatch, base_version: u64, timeout: Duration) -> Result<u64> {
        let mut inner = self
            .inner
            .try_write_for(timeout)
            .ok_or(SchemaError::CommitTimeout(timeout))?;

        for (key, _) in batch.iter() {
            if let Some(&touched) = inner.key_versions.get(key) {
                if touched > base_version {
                    warn!(
                        base_version,
                        touched, "write-write conflict, aborting commit"
                    );
                    return Err(SchemaError::ConcurrentSchemaWrite);
                }
            }
        }

        let version = inner.version + 1;
        let write_count = batch.len();
        let data = Arc::make_mut(&mut inner.data);
        for (key, value) in batch.iter() {
            match value {
                Some(value) => {
                    data.insert(key.to_vec(), value.to_vec());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        for (key, _) in batch.iter() {
            inner.key_versions.insert(key.to_vec(), version);
        }
        inner.version = version;
        debug!(version, write_count, "batch applied");
        Ok(version)
    }
}

struct MemSnapshot {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    version: u64,
}

impl StoreSnapshot for MemSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn scan<'a>(&'a self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        let prefix = prefix.to_vec();
        Box::new(
            self.data
                .range(prefix.clone()..)
                .take_while(move |(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| (key.clone(), value.clone())),
        )
    }

    fn seek<'a>(&'a self, from: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        Box::new(
            self.data
                .range(from.to_vec()..)
                .map(|(key, value)| (key.clone(), value.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn put_batch(pairs: &[(&[u8], &[u8])]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in pairs {
            batch.put(key.to_vec(), value.to_vec());
        }
        batch
    }

    #[test]
    fn snapshot_isolation() {
        let store = MemStore::new();
        let before = store.snapshot();
        store
            .apply(put_batch(&[(b"a", b"1")]), before.version(), TIMEOUT)
            .unwrap();

        assert_eq!(before.get(b"a"), None);
        assert_eq!(store.snapshot().get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn scan_is_sorted_and_prefix_bounded() {
        let store = MemStore::new();
        let base = store.snapshot().version();
        store
            .apply(
                put_batch(&[(b"b/2", b"x"), (b"a/1", b"y"), (b"b/1", b"z"), (b"c", b"w")]),
                base,
                TIMEOUT,
            )
            .unwrap();

        let snapshot = store.snapshot();
        let keys: Vec<_> = snapshot.scan(b"b/").map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b/1".to_vec(), b"b/2".to_vec()]);

        let from_seek: Vec<_> = snapshot.seek(b"b/2").map(|(k, _)| k).collect();
        assert_eq!(from_seek, vec![b"b/2".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn first_committer_wins() {
        let store = MemStore::new();
        let base = store.snapshot().version();

        store
            .apply(put_batch(&[(b"k", b"first")]), base, TIMEOUT)
            .unwrap();
        let err = store
            .apply(put_batch(&[(b"k", b"second")]), base, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConcurrentSchemaWrite));
        assert_eq!(store.snapshot().get(b"k"), Some(b"first".to_vec()));
    }

    #[test]
    fn disjoint_writers_both_commit() {
        let store = MemStore::new();
        let base = store.snapshot().version();
        store
            .apply(put_batch(&[(b"a", b"1")]), base, TIMEOUT)
            .unwrap();
        store
            .apply(put_batch(&[(b"b", b"2")]), base, TIMEOUT)
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(snapshot.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_applies_in_order() {
        let store = MemStore::new();
        let base = store.snapshot().version();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        batch.delete(b"k".to_vec());
        store.apply(batch, base, TIMEOUT).unwrap();
        assert_eq!(store.snapshot().get(b"k"), None);
    }
}
