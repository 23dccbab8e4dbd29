//! In-memory KV substrate with TTL semantics.
//!
//! Models the production store's behavior closely enough for protocol
//! tests: set-if-absent is atomic under the map lock, expired entries read
//! as absent, counters are signed. Expiry is evaluated lazily against the
//! injected clock, so tests can advance time deterministically.

use chrono::{DateTime, Utc};
use purchase_saga_core::clock::Clock;
use purchase_saga_core::kv::{KvError, KvFuture, KvStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`KvStore`] implementation.
pub struct InMemoryKvStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    /// Create an empty store reading time from `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(ttl)
            .ok()
            .map(|ttl| self.clock.now() + ttl)
    }

    /// Number of live (unexpired) entries, for test assertions.
    pub async fn live_len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

impl KvStore for InMemoryKvStore {
    fn acquire_lock<'a>(&'a self, key: &str, ttl: Duration) -> KvFuture<'a, bool> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(existing) if !existing.is_expired(now) => Ok(false),
                _ => {
                    entries.insert(
                        key,
                        Entry {
                            value: serde_json::Value::Bool(true),
                            expires_at: self.expiry(ttl),
                        },
                    );
                    Ok(true)
                }
            }
        })
    }

    fn release_lock<'a>(&'a self, key: &str) -> KvFuture<'a, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.lock().await.remove(&key);
            Ok(())
        })
    }

    fn set_reservation<'a>(
        &'a self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> KvFuture<'a, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let expires_at = self.expiry(ttl);
            self.entries
                .lock()
                .await
                .insert(key, Entry { value, expires_at });
            Ok(())
        })
    }

    fn get_reservation<'a>(&'a self, key: &str) -> KvFuture<'a, Option<serde_json::Value>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(entry) if entry.is_expired(now) => {
                    entries.remove(&key);
                    Ok(None)
                }
                Some(entry) => Ok(Some(entry.value.clone())),
                None => Ok(None),
            }
        })
    }

    fn delete_reservation<'a>(&'a self, key: &str) -> KvFuture<'a, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.lock().await.remove(&key);
            Ok(())
        })
    }

    fn incr<'a>(&'a self, key: &str) -> KvFuture<'a, i64> {
        let key = key.to_string();
        Box::pin(async move { self.bump(&key, 1).await })
    }

    fn decr<'a>(&'a self, key: &str) -> KvFuture<'a, i64> {
        let key = key.to_string();
        Box::pin(async move { self.bump(&key, -1).await })
    }
}

impl InMemoryKvStore {
    async fn bump(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.value.as_i64().ok_or_else(|| KvError::InvalidValue {
                    key: key.to_string(),
                })?
            }
            _ => 0,
        };
        let next = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::Value::from(next),
                expires_at: None,
            },
        );
        Ok(next)
    }
}
