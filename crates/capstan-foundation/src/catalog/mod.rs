//! Service catalog
//!
//! An in-memory, refresh-subscribed projection of the registry into a
//! capability-indexed view. Readers clone an `Arc` snapshot and never
//! observe partial updates; the watcher task (plus a periodic full
//! re-list as reconciliation against missed events) is the single
//! writer.

use crate::registry::{RegistryClient, RegistryEvent};
use capstan_kernel::clock::Clock;
use capstan_kernel::registry::RegistryResult;
use capstan_kernel::service::{CapabilityDescriptor, ServiceDescriptor};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Immutable view of the registered services at one instant.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// Service name → descriptor.
    by_name: HashMap<String, Arc<ServiceDescriptor>>,
    /// Registry key → service name (for removals).
    by_key: HashMap<String, String>,
    /// Monotonic snapshot version.
    pub version: u64,
}

impl CatalogSnapshot {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.by_name.get(name)
    }

    /// All services, sorted by name for deterministic iteration.
    pub fn services(&self) -> Vec<&Arc<ServiceDescriptor>> {
        let mut services: Vec<_> = self.by_name.values().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Live, capability-indexed view of the registry.
pub struct ServiceCatalog {
    client: RegistryClient,
    clock: Arc<dyn Clock>,
    /// Entries whose heartbeat is older than this are excluded.
    ttl: Duration,
    relist_interval: Duration,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    stop: CancellationToken,
}

impl ServiceCatalog {
    /// Create a catalog over a registry client.
    pub fn new(
        client: RegistryClient,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        relist_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            clock,
            ttl,
            relist_interval,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            stop: CancellationToken::new(),
        })
    }

    /// Prime from a full listing, then follow the registry watch.
    pub async fn start(self: &Arc<Self>) -> RegistryResult<()> {
        self.relist().await?;
        let events = self.client.watch().await?;
        let catalog = Arc::downgrade(self);
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let mut events = events;
            let mut relist_tick = {
                let Some(catalog) = catalog.upgrade() else { return };
                tokio::time::interval(catalog.relist_interval)
            };
            relist_tick.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.next() => {
                        let Some(event) = event else { break };
                        let Some(catalog) = catalog.upgrade() else { break };
                        catalog.apply(event);
                    }
                    _ = relist_tick.tick() => {
                        let Some(catalog) = catalog.upgrade() else { break };
                        if let Err(error) = catalog.relist().await {
                            warn!(%error, "catalog re-list failed; keeping current snapshot");
                        }
                    }
                }
            }
            debug!("catalog watcher stopped");
        });
        Ok(())
    }

    /// Stop the watcher task.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Rebuild the snapshot from a full listing.
    pub async fn relist(&self) -> RegistryResult<()> {
        let services = self.client.list(None).await?;
        let mut by_name = HashMap::with_capacity(services.len());
        let mut by_key = HashMap::with_capacity(services.len());
        for descriptor in services {
            by_key.insert(descriptor.registry_key(), descriptor.name.clone());
            by_name.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        let mut guard = self.snapshot.write();
        let version = guard.version + 1;
        *guard = Arc::new(CatalogSnapshot {
            by_name,
            by_key,
            version,
        });
        info!(services = guard.len(), version, "catalog snapshot rebuilt");
        Ok(())
    }

    /// Apply one watch event; duplicates are harmless (pure upsert).
    fn apply(&self, event: RegistryEvent) {
        let mut guard = self.snapshot.write();
        let current = guard.as_ref();
        let mut by_name = current.by_name.clone();
        let mut by_key = current.by_key.clone();
        match event {
            RegistryEvent::Upserted(descriptor) => {
                by_key.insert(descriptor.registry_key(), descriptor.name.clone());
                by_name.insert(descriptor.name.clone(), Arc::new(descriptor));
            }
            RegistryEvent::Removed { key } => {
                if let Some(name) = by_key.remove(&key) {
                    by_name.remove(&name);
                }
            }
        }
        let version = current.version + 1;
        *guard = Arc::new(CatalogSnapshot {
            by_name,
            by_key,
            version,
        });
    }

    /// Current snapshot handle.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn is_live(&self, descriptor: &ServiceDescriptor) -> bool {
        let age = self.clock.now_unix() - descriptor.last_heartbeat;
        // Future heartbeats (clock skew) count as live.
        age <= 0 || (age as u64) <= self.ttl.as_secs()
    }

    /// Resolve a live service by name.
    pub fn resolve(&self, service_name: &str) -> Option<Arc<ServiceDescriptor>> {
        let snapshot = self.snapshot();
        let descriptor = snapshot.service(service_name)?;
        self.is_live(descriptor).then(|| Arc::clone(descriptor))
    }

    /// Resolve a `(service, capability)` pair.
    pub fn find_capability(
        &self,
        service_name: &str,
        capability_name: &str,
    ) -> Option<(Arc<ServiceDescriptor>, CapabilityDescriptor)> {
        let service = self.resolve(service_name)?;
        let capability = service.capability(capability_name)?.clone();
        Some((service, capability))
    }

    /// Whether no live services are registered.
    pub fn is_empty(&self) -> bool {
        let snapshot = self.snapshot();
        !snapshot.services().iter().any(|s| self.is_live(s))
    }

    /// Deterministic textual projection for the planner prompt.
    ///
    /// Services and capabilities are emitted in name order; each field
    /// line carries the semantic type, requiredness, one example, and
    /// the description when present.
    pub fn format_for_planner(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for service in snapshot.services() {
            if !self.is_live(service) {
                continue;
            }
            out.push_str(&format!(
                "Service: {} ({})\n",
                service.name,
                service.kind.key_segment()
            ));
            let mut capabilities: Vec<_> = service.capabilities.iter().collect();
            capabilities.sort_by(|a, b| a.name.cmp(&b.name));
            for capability in capabilities {
                out.push_str(&format!("  Capability: {}", capability.name));
                if let Some(summary) = &capability.summary {
                    out.push_str(&format!(" — {summary}"));
                }
                out.push('\n');
                for field in &capability.input_schema {
                    let requiredness = if field.required { "required" } else { "optional" };
                    out.push_str(&format!(
                        "    {} {} ({})",
                        requiredness, field.name, field.field_type
                    ));
                    if let Some(example) = &field.example {
                        out.push_str(&format!(" e.g. {example}"));
                    }
                    if let Some(description) = &field.description {
                        out.push_str(&format!(" — {description}"));
                    }
                    out.push('\n');
                }
                if let Some(hint) = &capability.output_hint {
                    out.push_str(&format!("    returns: {hint}\n"));
                }
            }
        }
        out
    }

    /// Rank capabilities by naive keyword overlap with the request.
    ///
    /// Case-insensitive hits on capability name, summary, service name,
    /// and field names; capabilities with zero hits are omitted.
    pub fn capabilities_by_intent(&self, keywords: &[&str]) -> Vec<(String, CapabilityDescriptor)> {
        let snapshot = self.snapshot();
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut scored: Vec<(usize, String, CapabilityDescriptor)> = Vec::new();
        for service in snapshot.services() {
            if !self.is_live(service) {
                continue;
            }
            for capability in &service.capabilities {
                let mut haystack = format!(
                    "{} {} {}",
                    service.name,
                    capability.name,
                    capability.summary.as_deref().unwrap_or_default()
                )
                .to_lowercase();
                for field in &capability.input_schema {
                    haystack.push(' ');
                    haystack.push_str(&field.name.to_lowercase());
                }
                let score = lowered.iter().filter(|k| haystack.contains(k.as_str())).count();
                if score > 0 {
                    scored.push((score, service.name.clone(), capability.clone()));
                }
            }
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, s, c)| (s, c)).collect()
    }
}
