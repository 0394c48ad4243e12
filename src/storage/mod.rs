//! Pluggable checkpoint storage for pipeline state.
//!
//! A [`Storage`] backend persists observer snapshots between pipeline
//! iterations and across process restarts, and offers a named advisory lock
//! serializing pipelines that share a key. Backends are expected to treat
//! snapshots as opaque bytes.

mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStorage;

/// A named advisory lock held for the duration of a pipeline iteration.
///
/// The lock is released when the handle is dropped.
pub trait StorageLock: Send + Sync {
    /// The key the lock was taken for.
    fn key(&self) -> &str;
}

/// Persists and reloads per-observer state.
///
/// Load and save failures are fatal to the pipeline; cleanup is best-effort
/// and its failures are logged and swallowed by the caller.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Takes the advisory lock for `key`, waiting until it is available.
    async fn lock(&self, key: &str) -> Result<Box<dyn StorageLock>>;

    /// Returns the snapshots stored under `pipeline_key` for the requested
    /// observer keys. Only entries that exist are returned.
    async fn load(
        &self,
        pipeline_key: &str,
        observer_keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>>;

    /// Persists the given observer snapshots under `pipeline_key`.
    async fn save(&self, pipeline_key: &str, states: &HashMap<String, Vec<u8>>) -> Result<()>;

    /// Deletes the snapshots stored under `pipeline_key` for the given
    /// observer keys. Requires the advisory lock to be held.
    async fn cleanup(
        &self,
        pipeline_key: &str,
        observer_keys: &[String],
        lock: &dyn StorageLock,
    ) -> Result<()>;
}
