//! Cache service with pluggable storage and expiry events.

use crate::config::ConfigError;
use braid_component::{CacheOwner, CacheService};
use braid_event::{CacheExpiryEvent, Event};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// One stored entry, opaque to the service.
#[derive(Clone)]
pub struct CacheEntry {
    /// The stored value.
    pub value: Value,
    /// Absolute expiry on the monotonic clock, if any.
    pub expires_at: Option<Instant>,
    /// Metadata echoed in the expiry event.
    pub metadata: Option<Value>,
    /// Who receives the expiry event.
    pub owner: Option<CacheOwner>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Storage behind the cache service. Implementations need no internal
/// locking; the service serializes access.
pub trait CacheBackend: Send {
    /// Reads an entry without expiry interpretation.
    fn get(&mut self, key: &str) -> Option<CacheEntry>;
    /// Stores an entry.
    fn set(&mut self, key: String, entry: CacheEntry);
    /// Removes and returns an entry.
    fn delete(&mut self, key: &str) -> Option<CacheEntry>;
    /// Removes and returns every entry expired at `now`.
    fn take_expired(&mut self, now: Instant) -> Vec<(String, CacheEntry)>;
}

/// The in-memory backend.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: HashMap<String, CacheEntry>,
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    fn delete(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    fn take_expired(&mut self, now: Instant) -> Vec<(String, CacheEntry)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry)))
            .collect()
    }
}

/// Creates a backend by configuration name.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for unknown backends.
pub fn create_backend(kind: &str) -> Result<Box<dyn CacheBackend>, ConfigError> {
    match kind {
        "memory" => Ok(Box::new(MemoryCacheBackend::default())),
        other => Err(ConfigError::Invalid(format!(
            "unsupported cache backend '{other}'"
        ))),
    }
}

/// The connector's cache service: serialized access to a backend,
/// lazy expiry on reads, and a background sweeper delivering
/// CACHE_EXPIRY events to entry owners.
pub struct SharedCacheService {
    backend: Mutex<Box<dyn CacheBackend>>,
}

impl SharedCacheService {
    /// Wraps a backend and spawns the sweeper. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn new(backend: Box<dyn CacheBackend>, stop: CancellationToken) -> Arc<Self> {
        let service = Arc::new(Self {
            backend: Mutex::new(backend),
        });
        tokio::spawn(sweep(service.clone(), stop));
        service
    }

    fn expire_entry(&self, key: String, entry: CacheEntry) {
        deliver_expiry(key, entry);
    }
}

async fn sweep(service: Arc<SharedCacheService>, stop: CancellationToken) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            () = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
        let expired = service.backend.lock().take_expired(Instant::now());
        for (key, entry) in expired {
            service.expire_entry(key, entry);
        }
    }
}

fn deliver_expiry(key: String, entry: CacheEntry) {
    let Some(owner) = entry.owner else {
        return;
    };
    let event = CacheExpiryEvent {
        key,
        metadata: entry.metadata,
        expired_data: entry.value,
    };
    // Delivery must not block cache callers; the owner's queue applies
    // its own backpressure to the spawned sender.
    tokio::spawn(async move {
        if owner.target.send(Event::CacheExpiry(event)).await.is_err() {
            debug!("cache expiry target queue closed");
        }
    });
}

impl CacheService for SharedCacheService {
    fn add_data(
        &self,
        key: &str,
        value: Value,
        expiry: Option<Duration>,
        metadata: Option<Value>,
        owner: Option<CacheOwner>,
    ) {
        let entry = CacheEntry {
            value,
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
            metadata,
            owner,
        };
        self.backend.lock().set(key.to_string(), entry);
    }

    fn get_data(&self, key: &str) -> Option<Value> {
        let mut backend = self.backend.lock();
        let entry = backend.get(key)?;
        if entry.is_expired(Instant::now()) {
            if let Some(entry) = backend.delete(key) {
                drop(backend);
                self.expire_entry(key.to_string(), entry);
            }
            return None;
        }
        Some(entry.value)
    }

    fn remove_data(&self, key: &str) {
        self.backend.lock().delete(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_event::event_channel;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let stop = CancellationToken::new();
        let cache = SharedCacheService::new(Box::new(MemoryCacheBackend::default()), stop.clone());

        cache.add_data("k", json!({"v": 1}), None, None, None);
        assert_eq!(cache.get_data("k"), Some(json!({"v": 1})));

        cache.remove_data("k");
        assert_eq!(cache.get_data("k"), None);
        stop.cancel();
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let stop = CancellationToken::new();
        let cache = SharedCacheService::new(Box::new(MemoryCacheBackend::default()), stop.clone());

        cache.add_data("gone", json!(1), Some(Duration::from_millis(5)), None, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get_data("gone"), None);
        stop.cancel();
    }

    #[tokio::test]
    async fn owner_receives_expiry_event() {
        let stop = CancellationToken::new();
        let cache = SharedCacheService::new(Box::new(MemoryCacheBackend::default()), stop.clone());
        let (tx, rx) = event_channel(8);

        cache.add_data(
            "session",
            json!({"state": "open"}),
            Some(Duration::from_millis(10)),
            Some(json!({"kind": "session"})),
            Some(CacheOwner { owner: 1, target: tx }),
        );

        match rx.recv().await {
            Some(Event::CacheExpiry(event)) => {
                assert_eq!(event.key, "session");
                assert_eq!(event.metadata, Some(json!({"kind": "session"})));
                assert_eq!(event.expired_data, json!({"state": "open"}));
            }
            other => panic!("expected cache expiry, got {other:?}"),
        }
        stop.cancel();
    }
}
