// crates/core/src/memory.rs
//! In-process `EphemeralStore`.
//!
//! Redis-shaped semantics (one keyspace, typed values, WRONGTYPE on misuse,
//! fire-and-forget pub/sub) backed by a mutex-guarded map and
//! `tokio::sync::broadcast` channels. Used by the binary when no external
//! store is wired in, and by tests, which can also flip the store offline or
//! sever live subscriptions to exercise the failure paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{StoreError, StoreResult};
use crate::store::{EphemeralStore, MessageStream};

/// Per-channel buffer. A subscriber that falls this far behind skips ahead.
const CHANNEL_CAPACITY: usize = 1024;

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Value>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until
    /// switched back. Existing subscriptions are left alone.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Close every open subscription, as a dropped server connection would.
    pub fn drop_subscriptions(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.channels.clear();
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        self.inner
            .lock()
            .map_err(|e| StoreError::Backend(format!("memory store lock poisoned: {e}")))
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get_hash(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let inner = self.lock()?;
        match inner.data.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn set_hash(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let entry = inner
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        let Value::Hash(hash) = entry else {
            return Err(wrong_type(key, "hash"));
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.set_hash(key, &[(field, value.to_string())]).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.data.contains_key(key))
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.lock()?;
        match inner.data.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner
            .data
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn list_length(&self, key: &str) -> StoreResult<u64> {
        let inner = self.lock()?;
        match inner.data.get(key) {
            None => Ok(0),
            Some(Value::List(l)) => Ok(l.len() as u64),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn list_range(&self, key: &str, start: u64, end: u64) -> StoreResult<Vec<String>> {
        let inner = self.lock()?;
        let list = match inner.data.get(key) {
            None => return Ok(Vec::new()),
            Some(Value::List(l)) => l,
            Some(_) => return Err(wrong_type(key, "list")),
        };
        if list.is_empty() || start > end {
            return Ok(Vec::new());
        }
        let start = start as usize;
        let end = (end as usize).min(list.len() - 1);
        if start > end {
            return Ok(Vec::new());
        }
        Ok(list.range(start..=end).cloned().collect())
    }

    async fn list_append(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let entry = inner
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        let Value::List(list) = entry else {
            return Err(wrong_type(key, "list"));
        };
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn list_append_capped(
        &self,
        key: &str,
        base_key: &str,
        value: &str,
        keep_last: u64,
    ) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let base = match inner.data.get(base_key) {
            None => 0,
            Some(Value::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| wrong_type(base_key, "integer"))?,
            Some(_) => return Err(wrong_type(base_key, "integer")),
        };
        let entry = inner
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        let Value::List(list) = entry else {
            return Err(wrong_type(key, "list"));
        };
        list.push_back(value.to_string());
        let keep = keep_last.max(1) as usize;
        let evicted = list.len().saturating_sub(keep);
        if evicted > 0 {
            list.drain(..evicted);
        }
        let len = list.len() as u64;
        if evicted > 0 {
            inner.data.insert(
                base_key.to_string(),
                Value::Str((base + evicted as i64).to_string()),
            );
        }
        Ok(len)
    }

    async fn list_pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.lock()?;
        match inner.data.get_mut(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(list.pop_front()),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let inner = self.lock()?;
        Ok(inner
            .channels
            .get(channel)
            .and_then(|tx| tx.send(message.to_string()).ok())
            .unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        let mut inner = self.lock()?;
        let rx = inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let channel = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |msg| {
            let out = match msg {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(channel = %channel, skipped = n, "Subscriber lagged, messages skipped");
                    None
                }
            };
            futures_util::future::ready(out)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_hash("h").await.unwrap().is_empty());

        store
            .set_hash("h", &[("a", "1".into()), ("b", "2".into())])
            .await
            .unwrap();
        store.set_hash_field("h", "a", "3").await.unwrap();

        let h = store.get_hash("h").await.unwrap();
        assert_eq!(h.get("a").map(String::as_str), Some("3"));
        assert_eq!(h.get("b").map(String::as_str), Some("2"));
        assert!(store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("s", "x").await.unwrap();
        assert!(matches!(
            store.get_hash("s").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.list_append("s", "y").await,
            Err(StoreError::WrongType { .. })
        ));
        // the eviction base must hold an integer
        assert!(matches!(
            store.list_append_capped("l", "s", "v", 3).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_range_and_pop() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.list_append("l", &format!("v{i}")).await.unwrap();
        }
        assert_eq!(store.list_length("l").await.unwrap(), 5);
        assert_eq!(store.list_range("l", 1, 2).await.unwrap(), vec!["v1", "v2"]);
        // end clamps to the tail
        assert_eq!(store.list_range("l", 3, 100).await.unwrap(), vec!["v3", "v4"]);
        assert!(store.list_range("l", 7, 9).await.unwrap().is_empty());

        assert_eq!(store.list_pop_front("l").await.unwrap().as_deref(), Some("v0"));
        assert_eq!(store.list_range("l", 0, 10).await.unwrap(), vec!["v1", "v2", "v3", "v4"]);
        assert_eq!(store.list_length("l").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_list_append_capped_tracks_evictions() {
        let store = MemoryStore::new();
        for i in 0..3 {
            assert_eq!(
                store.list_append_capped("l", "b", &format!("v{i}"), 3).await.unwrap(),
                i + 1
            );
        }
        assert_eq!(store.get("b").await.unwrap(), None);

        for i in 3..7 {
            assert_eq!(
                store.list_append_capped("l", "b", &format!("v{i}"), 3).await.unwrap(),
                3
            );
        }
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("4"));
        assert_eq!(
            store.list_range("l", 0, 2).await.unwrap(),
            vec!["v4", "v5", "v6"]
        );
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set_hash_field("bench_job:a", "status", "queued").await.unwrap();
        store.set_hash_field("bench_job:b", "status", "queued").await.unwrap();
        store.list_append("bench_job_log:a", "x").await.unwrap();

        let mut keys = store.keys("bench_job:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["bench_job:a", "bench_job:b"]);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let store = MemoryStore::new();
        // nobody listening yet
        assert_eq!(store.publish("c", "lost").await.unwrap(), 0);

        let mut stream = store.subscribe("c").await.unwrap();
        assert_eq!(store.publish("c", "one").await.unwrap(), 1);
        store.publish("c", "two").await.unwrap();

        assert_eq!(stream.next().await.as_deref(), Some("one"));
        assert_eq!(stream.next().await.as_deref(), Some("two"));

        store.drop_subscriptions();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.keys("x").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.keys("x").await.unwrap().is_empty());
    }
}
