//! Registry backend contract
//!
//! The service registry is specified as a generic KV-with-TTL store
//! plus a change stream. Concrete backends (in-memory for tests and
//! single-node deployments, or an external store) implement
//! [`RegistryBackend`]; the registry client and catalog in the
//! foundation crate are written against this contract only.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A change observed on the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum KvEvent {
    /// A key was created or overwritten.
    Put { key: String, value: serde_json::Value },
    /// A key was explicitly deleted.
    Delete { key: String },
    /// A key's TTL elapsed without renewal.
    Expired { key: String },
}

impl KvEvent {
    /// The key this event concerns.
    pub fn key(&self) -> &str {
        match self {
            KvEvent::Put { key, .. } | KvEvent::Delete { key } | KvEvent::Expired { key } => key,
        }
    }
}

/// Boxed change stream returned by [`RegistryBackend::watch`].
pub type KvEventStream = Pin<Box<dyn Stream<Item = KvEvent> + Send>>;

/// Backend failure modes.
///
/// Transient unavailability is reported, not thrown fatally; callers
/// retry with backoff.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The backend is temporarily unreachable.
    #[error("registry backend unavailable: {0}")]
    Unavailable(String),

    /// A value failed to decode as the expected entry shape.
    #[error("malformed registry entry at '{key}': {reason}")]
    MalformedEntry { key: String, reason: String },
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Generic KV-with-TTL + change-stream store.
///
/// Required semantics:
/// - entries auto-expire after their TTL unless re-put;
/// - `scan` is eventually consistent;
/// - `watch` delivers each change at least once — duplicates are legal
///   and consumers must be idempotent.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Store `value` under `key` with the given TTL, replacing any
    /// previous value and resetting its TTL.
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) -> RegistryResult<()>;

    /// Fetch a live (unexpired) value.
    async fn get(&self, key: &str) -> RegistryResult<Option<serde_json::Value>>;

    /// All live entries whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> RegistryResult<Vec<(String, serde_json::Value)>>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> RegistryResult<bool>;

    /// Subscribe to changes under `prefix`.
    async fn watch(&self, prefix: &str) -> RegistryResult<KvEventStream>;
}
