// Key-value store boundary. Collectors and the worker only see `KvStore`;
// etcd is one implementation, the in-memory store backs tests and dry runs.

#[cfg(feature = "etcd")]
mod etcd;
mod memory;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or server-side failure; the current collector gives up until the next pass.
    #[error("store {operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn transport(operation: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Transport {
            operation,
            message: err.to_string(),
        }
    }
}

/// One key returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Half-open key range `[start, end)`; `end: None` runs to the end of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn between(start: &str, end: &str) -> Self {
        Self {
            start: start.as_bytes().to_vec(),
            end: Some(end.as_bytes().to_vec()),
        }
    }

    /// Every key beginning with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            start: prefix.as_bytes().to_vec(),
            end: prefix_range_end(prefix.as_bytes()),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && self.end.as_deref().is_none_or(|end| key < end)
    }
}

/// Smallest key greater than every key starting with `prefix`, as etcd computes it.
pub fn prefix_range_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Lazy, finite, non-restartable scan result.
pub type EntryStream<'a> = BoxStream<'a, Result<KvEntry, StoreError>>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value at `key`, or `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Streams every entry in `range` in key order. Implementations must not cap the
    /// number of entries returned.
    fn scan(&self, range: KeyRange) -> EntryStream<'_>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    fn get_prefix(&self, prefix: &str) -> EntryStream<'_> {
        self.scan(KeyRange::prefix(prefix))
    }

    fn get_range(&self, start: &str, end: &str) -> EntryStream<'_> {
        self.scan(KeyRange::between(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_range_end(b"/mon/dr"), Some(b"/mon/ds".to_vec()));
    }

    #[test]
    fn prefix_end_drops_trailing_max_bytes() {
        assert_eq!(prefix_range_end(&[b'a', 0xff]), Some(vec![b'b']));
        assert_eq!(prefix_range_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_range_end(b""), None);
    }

    #[test]
    fn prefix_range_contains_only_prefixed_keys() {
        let range = KeyRange::prefix("/mon/snap/");
        assert!(range.contains(b"/mon/snap/01/status"));
        assert!(!range.contains(b"/mon/snap"));
        assert!(!range.contains(b"/mon/snaq/01"));
    }
}
