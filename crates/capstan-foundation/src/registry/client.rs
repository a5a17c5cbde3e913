//! Registry client
//!
//! Wraps a [`RegistryBackend`] with the service-level protocol: JSON
//! descriptors under `/services/{kind}/{id}` with a TTL, renewal at
//! ttl/3 from a background task, typed change events for the catalog,
//! and eventually-consistent listing.
//!
//! Transient backend failures are logged and retried with capped
//! backoff; the renewal loop never panics.

use capstan_kernel::clock::Clock;
use capstan_kernel::registry::{KvEvent, RegistryBackend, RegistryError, RegistryResult};
use capstan_kernel::service::{ServiceDescriptor, ServiceKind};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prefix under which all services live.
pub const SERVICES_PREFIX: &str = "/services/";

/// A typed change observed on the service tree.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A descriptor appeared or was refreshed.
    Upserted(ServiceDescriptor),
    /// A descriptor was removed or expired.
    Removed { key: String },
}

/// Boxed typed change stream.
pub type RegistryEventStream = Pin<Box<dyn Stream<Item = RegistryEvent> + Send>>;

/// Service-level client over a [`RegistryBackend`].
#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RegistryClient {
    /// Create a client with the given entry TTL.
    pub fn new(backend: Arc<dyn RegistryBackend>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { backend, clock, ttl }
    }

    /// Register a service and start its renewal loop.
    ///
    /// The returned [`Registration`] renews at ttl/3 until dropped or
    /// explicitly deregistered.
    pub async fn register(&self, mut descriptor: ServiceDescriptor) -> RegistryResult<Registration> {
        descriptor.touch(self.clock.now_unix());
        let key = descriptor.registry_key();
        self.put_descriptor(&key, &descriptor).await?;

        let stop = CancellationToken::new();
        let renew_stop = stop.clone();
        let client = self.clone();
        let renew_descriptor = descriptor.clone();
        let renew_key = key.clone();
        let handle = tokio::spawn(async move {
            client
                .renewal_loop(renew_key, renew_descriptor, renew_stop)
                .await;
        });

        Ok(Registration {
            client: self.clone(),
            key,
            stop,
            handle: Some(handle),
        })
    }

    async fn renewal_loop(
        &self,
        key: String,
        mut descriptor: ServiceDescriptor,
        stop: CancellationToken,
    ) {
        let interval = self.ttl / 3;
        let mut failures: u32 = 0;
        loop {
            let wait = if failures == 0 {
                interval
            } else {
                // Capped backoff after a failed renewal; never longer
                // than the interval or the entry would expire.
                (Duration::from_millis(250) * 2u32.saturating_pow(failures - 1)).min(interval)
            };
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            descriptor.touch(self.clock.now_unix());
            match self.put_descriptor(&key, &descriptor).await {
                Ok(()) => {
                    if failures > 0 {
                        debug!(key = %key, "registry renewal recovered");
                    }
                    failures = 0;
                }
                Err(error) => {
                    failures = failures.saturating_add(1);
                    warn!(key = %key, %error, failures, "registry renewal failed; backing off");
                }
            }
        }
    }

    async fn put_descriptor(
        &self,
        key: &str,
        descriptor: &ServiceDescriptor,
    ) -> RegistryResult<()> {
        let value = serde_json::to_value(descriptor).map_err(|e| RegistryError::MalformedEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.put(key, value, self.ttl).await
    }

    /// All live services, optionally restricted to one kind.
    pub async fn list(&self, kind: Option<ServiceKind>) -> RegistryResult<Vec<ServiceDescriptor>> {
        let prefix = match kind {
            Some(kind) => format!("{SERVICES_PREFIX}{}/", kind.key_segment()),
            None => SERVICES_PREFIX.to_string(),
        };
        let entries = self.backend.scan(&prefix).await?;
        let mut services = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_value::<ServiceDescriptor>(value) {
                Ok(descriptor) => services.push(descriptor),
                Err(error) => {
                    // A malformed neighbour must not poison the listing.
                    warn!(key = %key, %error, "skipping malformed registry entry");
                }
            }
        }
        Ok(services)
    }

    /// Subscribe to typed changes on the service tree.
    ///
    /// Delivery is at-least-once; consumers must upsert idempotently.
    pub async fn watch(&self) -> RegistryResult<RegistryEventStream> {
        let raw = self.backend.watch(SERVICES_PREFIX).await?;
        let typed = raw.filter_map(|event| async move {
            match event {
                KvEvent::Put { key, value } => {
                    match serde_json::from_value::<ServiceDescriptor>(value) {
                        Ok(descriptor) => Some(RegistryEvent::Upserted(descriptor)),
                        Err(error) => {
                            warn!(key = %key, %error, "ignoring malformed watch payload");
                            None
                        }
                    }
                }
                KvEvent::Delete { key } | KvEvent::Expired { key } => {
                    Some(RegistryEvent::Removed { key })
                }
            }
        });
        Ok(Box::pin(typed))
    }

    /// Remove a service by key.
    pub async fn deregister(&self, key: &str) -> RegistryResult<bool> {
        self.backend.delete(key).await
    }
}

/// Live registration handle; renewal stops when this drops.
pub struct Registration {
    client: RegistryClient,
    key: String,
    stop: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Registration {
    /// The registry key this registration owns.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop renewing and remove the entry.
    pub async fn deregister(mut self) -> RegistryResult<()> {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.client.deregister(&self.key).await?;
        Ok(())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
