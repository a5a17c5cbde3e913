//! In-memory [`RegistryBackend`] implementation.
//!
//! Suitable for tests and single-node deployments. Distributed
//! backends belong in separate plugin crates and only need to satisfy
//! the kernel contract.
//!
//! TTL handling is two-tier: reads filter expired entries lazily, and a
//! background sweeper turns expirations into `Expired` watch events.

use async_trait::async_trait;
use capstan_kernel::clock::Clock;
use capstan_kernel::registry::{KvEvent, KvEventStream, RegistryBackend, RegistryResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

struct Entry {
    value: serde_json::Value,
    expires_at_ms: u64,
}

/// [`RegistryBackend`] backed by a mutex-guarded map.
pub struct MemoryRegistry {
    clock: Arc<dyn Clock>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    events: broadcast::Sender<KvEvent>,
    sweeper_stop: CancellationToken,
}

impl MemoryRegistry {
    /// Create a registry and start its expiry sweeper.
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let registry = Arc::new(Self {
            clock,
            entries: Arc::new(Mutex::new(HashMap::new())),
            events,
            sweeper_stop: CancellationToken::new(),
        });
        registry.spawn_sweeper(Duration::from_secs(1));
        registry
    }

    fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        // Weak handle: the sweeper must not keep the registry alive.
        let registry = Arc::downgrade(self);
        let stop = self.sweeper_stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.sweep();
                    }
                }
            }
        });
    }

    fn sweep(&self) {
        let now = self.clock.now_millis();
        let mut expired = Vec::new();
        {
            let mut entries = self.entries.lock();
            entries.retain(|key, entry| {
                let live = entry.expires_at_ms > now;
                if !live {
                    expired.push(key.clone());
                }
                live
            });
        }
        for key in expired {
            let _ = self.events.send(KvEvent::Expired { key });
        }
    }

    /// Stop the background sweeper.
    pub fn shutdown(&self) {
        self.sweeper_stop.cancel();
    }
}

impl Drop for MemoryRegistry {
    fn drop(&mut self) {
        self.sweeper_stop.cancel();
    }
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) -> RegistryResult<()> {
        let expires_at_ms = self.clock.now_millis() + ttl.as_millis() as u64;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at_ms,
            },
        );
        let _ = self.events.send(KvEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Option<serde_json::Value>> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at_ms > now)
            .map(|entry| entry.value.clone()))
    }

    async fn scan(&self, prefix: &str) -> RegistryResult<Vec<(String, serde_json::Value)>> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        let mut out: Vec<(String, serde_json::Value)> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at_ms > now)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, key: &str) -> RegistryResult<bool> {
        let existed = self.entries.lock().remove(key).is_some();
        if existed {
            let _ = self.events.send(KvEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn watch(&self, prefix: &str) -> RegistryResult<KvEventStream> {
        let prefix = prefix.to_string();
        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| item.ok())
            .filter(move |event| event.key().starts_with(&prefix));
        Ok(Box::pin(stream))
    }
}
