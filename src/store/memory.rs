// In-memory KvStore with failure injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, RwLock};

use super::{EntryStream, KeyRange, KvEntry, KvStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_puts: AtomicBool,
    /// `Some` only for stores built with [`MemoryStore::recording`].
    put_log: Option<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also remembers every key passed to `put`, for assertions.
    pub fn recording() -> Self {
        Self {
            put_log: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    /// Seeds entries without going through `put` (not recorded in the put log).
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.data.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Value at `key` decoded as JSON, for assertions.
    pub async fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let data = self.data.read().await;
        data.get(key)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Keys passed to `put`, in call order. Always empty unless built with
    /// [`MemoryStore::recording`].
    pub async fn put_log(&self) -> Vec<String> {
        match &self.put_log {
            Some(log) => log.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    async fn collect_range(&self, range: &KeyRange) -> Result<Vec<KvEntry>, StoreError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::transport("scan", "injected read failure"));
        }
        let data = self.data.read().await;
        Ok(data
            .iter()
            .filter(|(key, _)| range.contains(key.as_bytes()))
            .map(|(key, value)| KvEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::transport("get", "injected read failure"));
        }
        Ok(self.data.read().await.get(key).cloned())
    }

    fn scan(&self, range: KeyRange) -> EntryStream<'_> {
        stream::once(async move { self.collect_range(&range).await })
            .flat_map(|result| match result {
                Ok(entries) => stream::iter(entries.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
            })
            .boxed()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(StoreError::transport("put", "injected write failure"));
        }
        self.insert(key, value).await;
        if let Some(log) = &self.put_log {
            log.lock().await.push(key.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn keys(stream: EntryStream<'_>) -> Vec<String> {
        stream.map(|e| e.unwrap().key).collect().await
    }

    #[tokio::test]
    async fn prefix_scan_returns_keys_in_order() {
        let store = MemoryStore::new();
        store.insert("/mon/dr02/x", "2").await;
        store.insert("/mon/dr01/x", "1").await;
        store.insert("/mon/snap/01", "s").await;

        let keys = keys(store.get_prefix("/mon/dr")).await;
        assert_eq!(keys, vec!["/mon/dr01/x", "/mon/dr02/x"]);
    }

    #[tokio::test]
    async fn range_includes_start_and_excludes_end() {
        let store = MemoryStore::new();
        for key in [
            "/mon/dr10/x",
            "/mon/dr03",
            "/mon/dr09/x",
            "/mon/dr02/z",
            "/mon/dr10",
            "/mon/dr03/x",
        ] {
            store.insert(key, "v").await;
        }

        let keys = keys(store.get_range("/mon/dr03", "/mon/dr10")).await;
        assert_eq!(keys, vec!["/mon/dr03", "/mon/dr03/x", "/mon/dr09/x"]);
    }

    #[tokio::test]
    async fn injected_read_failure_surfaces_in_scan() {
        let store = MemoryStore::new();
        store.insert("/a", "1").await;
        store.set_fail_reads(true);
        let results: Vec<_> = store.get_prefix("/").collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[tokio::test]
    async fn put_log_is_kept_only_when_recording() {
        let plain = MemoryStore::new();
        plain.put("/a", b"1".to_vec()).await.unwrap();
        assert!(plain.put_log().await.is_empty());
        assert_eq!(plain.len().await, 1);

        let recording = MemoryStore::recording();
        recording.put("/b", b"1".to_vec()).await.unwrap();
        recording.put("/a", b"2".to_vec()).await.unwrap();
        assert_eq!(recording.put_log().await, vec!["/b", "/a"]);
    }
}
