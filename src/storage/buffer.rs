use std::collections::btree_map::{self, BTreeMap};
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::storage::kv::{SnapshotStore, StoreSnapshot, WriteBatch};

#[derive(Clone, Debug)]
enum BufferedWrite {
    Put(Vec<u8>),
    Delete,
}

/// The transaction's view of the backing store: a snapshot taken at
/// transaction start, overlaid with the transaction's own buffered writes.
///
/// Reads observe buffered state ("read-your-writes"); nothing reaches the
/// store before [`SchemaStorage::commit`].
pub struct SchemaStorage {
    store: Arc<dyn SnapshotStore>,
    snapshot: Box<dyn StoreSnapshot>,
    buffer: BTreeMap<Vec<u8>, BufferedWrite>,
}

impl SchemaStorage {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let snapshot = store.snapshot();
        Self {
            store,
            snapshot,
            buffer: BTreeMap::new(),
        }
    }

    /// Commit version this transaction reads at.
    pub fn base_version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.buffer.get(key) {
            Some(BufferedWrite::Put(value)) => Some(value.clone()),
            Some(BufferedWrite::Delete) => None,
            None => self.snapshot.get(key),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.buffer.insert(key, BufferedWrite::Put(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.buffer.insert(key, BufferedWrite::Delete);
    }

    pub fn has_writes(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Sorted merged view of snapshot and buffer under `prefix`.
    pub fn scan<'a>(&'a self, prefix: &[u8]) -> MergedScan<'a> {
        MergedScan {
            base: self.snapshot.scan(prefix).peekable(),
            buffered: self
                .buffer
                .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), Bound::Unbounded))
                .peekable(),
            bound: ScanBound::Prefix(prefix.to_vec()),
        }
    }

    /// Sorted merged view starting at the first key `>= from`.
    pub fn seek<'a>(&'a self, from: &[u8]) -> MergedScan<'a> {
        MergedScan {
            base: self.snapshot.seek(from).peekable(),
            buffered: self
                .buffer
                .range::<Vec<u8>, _>((Bound::Included(from.to_vec()), Bound::Unbounded))
                .peekable(),
            bound: ScanBound::Unbounded,
        }
    }

    /// Drains the buffer and applies it atomically to the backing store.
    pub fn commit(&mut self, timeout: Duration) -> Result<u64> {
        let mut batch = WriteBatch::new();
        for (key, write) in std::mem::take(&mut self.buffer) {
            match write {
                BufferedWrite::Put(value) => batch.put(key, value),
                BufferedWrite::Delete => batch.delete(key),
            }
        }
        debug!(
            writes = batch.len(),
            base_version = self.base_version(),
            "committing buffered schema writes"
        );
        self.store.apply(batch, self.base_version(), timeout)
    }

    /// Discards every buffered write.
    pub fn rollback(&mut self) {
        self.buffer.clear();
    }
}

enum ScanBound {
    Prefix(Vec<u8>),
    Unbounded,
}

impl ScanBound {
    fn admits(&self, key: &[u8]) -> bool {
        match self {
            ScanBound::Prefix(prefix) => key.starts_with(prefix),
            ScanBound::Unbounded => true,
        }
    }
}

/// Ascending merge of the snapshot stream with the write buffer. Buffered
/// puts shadow snapshot values, buffered deletes hide them.
pub struct MergedScan<'a> {
    base: Peekable<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>>,
    buffered: Peekable<btree_map::Range<'a, Vec<u8>, BufferedWrite>>,
    bound: ScanBound,
}

impl Iterator for MergedScan<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let buffered_key = match self.buffered.peek() {
                Some((key, _)) if self.bound.admits(key) => Some((*key).clone()),
                _ => None,
            };
            match (self.base.peek(), buffered_key) {
                (Some((base_key, _)), Some(buf_key)) => {
                    if *base_key < buf_key {
                        return self.base.next();
                    }
                    if *base_key == buf_key {
                        self.base.next();
                    }
                    let (key, write) = self.buffered.next()?;
                    match write {
                        BufferedWrite::Put(value) => return Some((key.clone(), value.clone())),
                        BufferedWrite::Delete => continue,
                    }
                }
                (Some(_), None) => return self.base.next(),
                (None, Some(_)) => {
                    let (key, write) = self.buffered.next()?;
                    match write {
                        BufferedWrite::Put(value) => return Some((key.clone(), value.clone())),
                        BufferedWrite::Delete => continue,
                    }
                }
                (None, None) => return None,
            }
        }
    }
}
