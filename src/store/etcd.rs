// etcd-backed KvStore via etcd-client.
// Scans are paged so arbitrarily large prefixes never hit the gRPC message size limit.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, KvClient, SortOrder, SortTarget};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, instrument};

use super::{EntryStream, KeyRange, KvEntry, KvStore, StoreError};
use crate::config::StoreConfig;

pub struct EtcdStore {
    kv: KvClient,
    page_size: i64,
}

impl EtcdStore {
    #[instrument(skip(config), fields(endpoints = ?config.endpoints))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| StoreError::transport("connect", e))?;
        debug!("connected to etcd");
        Ok(Self {
            kv: client.kv_client(),
            page_size: config.page_size as i64,
        })
    }
}

struct ScanState {
    kv: KvClient,
    page_size: i64,
    /// Start key of the next page; `None` once the last page has been fetched.
    next: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    buffered: VecDeque<KvEntry>,
}

async fn next_entry(mut state: ScanState) -> Result<Option<(KvEntry, ScanState)>, StoreError> {
    loop {
        if let Some(entry) = state.buffered.pop_front() {
            return Ok(Some((entry, state)));
        }
        let Some(start) = state.next.take() else {
            return Ok(None);
        };

        let options = GetOptions::new()
            .with_limit(state.page_size)
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let options = match &state.end {
            Some(end) => options.with_range(end.clone()),
            None => options.with_from_key(),
        };
        let resp = state
            .kv
            .get(start, Some(options))
            .await
            .map_err(|e| StoreError::transport("scan", e))?;

        let kvs = resp.kvs();
        if resp.more()
            && let Some(last) = kvs.last()
        {
            // "\0" appended gives the smallest key after `last`.
            let mut next = last.key().to_vec();
            next.push(0);
            state.next = Some(next);
        }
        state.buffered.extend(kvs.iter().map(|kv| KvEntry {
            key: String::from_utf8_lossy(kv.key()).into_owned(),
            value: kv.value().to_vec(),
        }));
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut kv = self.kv.clone();
        let resp = kv
            .get(key, None)
            .await
            .map_err(|e| StoreError::transport("get", e))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    fn scan(&self, range: KeyRange) -> EntryStream<'_> {
        let state = ScanState {
            kv: self.kv.clone(),
            page_size: self.page_size,
            next: Some(range.start),
            end: range.end,
            buffered: VecDeque::new(),
        };
        stream::try_unfold(state, next_entry).boxed()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut kv = self.kv.clone();
        kv.put(key, value, None)
            .await
            .map_err(|e| StoreError::transport("put", e))?;
        Ok(())
    }
}
