use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use super::{Storage, StorageLock};
use crate::error::Result;

/// In-process [`Storage`] backend.
///
/// Keeps snapshots and named locks in memory, so state survives pipeline
/// restarts within one process but not across processes. Suitable for tests
/// and single-process deployments; production deployments plug in an
/// external backend instead.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    states: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Vec<u8>>>> {
        self.inner.states.lock().expect("state mutex poisoned")
    }

    /// The snapshots currently stored under `pipeline_key`. Primarily useful
    /// for inspecting checkpoint contents in tests.
    pub fn entries(&self, pipeline_key: &str) -> HashMap<String, Vec<u8>> {
        self.states().get(pipeline_key).cloned().unwrap_or_default()
    }
}

#[derive(Debug)]
struct MemoryLock {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl StorageLock for MemoryLock {
    fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn lock(&self, key: &str) -> Result<Box<dyn StorageLock>> {
        let named = {
            let mut locks = self.inner.locks.lock().expect("lock mutex poisoned");
            Arc::clone(
                locks
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let guard = named.lock_owned().await;
        Ok(Box::new(MemoryLock {
            key: key.to_owned(),
            _guard: guard,
        }))
    }

    async fn load(
        &self,
        pipeline_key: &str,
        observer_keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        let states = self.states();
        let Some(saved) = states.get(pipeline_key) else {
            return Ok(HashMap::new());
        };
        Ok(observer_keys
            .iter()
            .filter_map(|key| saved.get(key).map(|state| (key.clone(), state.clone())))
            .collect())
    }

    async fn save(&self, pipeline_key: &str, states: &HashMap<String, Vec<u8>>) -> Result<()> {
        self.states()
            .entry(pipeline_key.to_owned())
            .or_default()
            .extend(states.iter().map(|(key, state)| (key.clone(), state.clone())));
        Ok(())
    }

    async fn cleanup(
        &self,
        pipeline_key: &str,
        observer_keys: &[String],
        _lock: &dyn StorageLock,
    ) -> Result<()> {
        let mut states = self.states();
        if let Some(saved) = states.get_mut(pipeline_key) {
            for key in observer_keys {
                saved.remove(key);
            }
            if saved.is_empty() {
                states.remove(pipeline_key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::MemoryStorage;
    use crate::storage::Storage;

    fn states(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.as_bytes().to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn save_load_cleanup_roundtrip() {
        let storage = MemoryStorage::new();
        storage
            .save("pipe", &states(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();

        let loaded = storage
            .load("pipe", &["a".into(), "b".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(loaded, states(&[("a", "1"), ("b", "2")]));

        let lock = storage.lock("pipe").await.unwrap();
        storage
            .cleanup("pipe", &["a".into(), "b".into()], lock.as_ref())
            .await
            .unwrap();
        assert!(storage.entries("pipe").is_empty());
    }

    #[tokio::test]
    async fn load_returns_only_requested_keys() {
        let storage = MemoryStorage::new();
        storage
            .save("pipe", &states(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();

        let loaded = storage.load("pipe", &["b".into()]).await.unwrap();
        assert_eq!(loaded, states(&[("b", "2")]));
        assert!(storage.load("other", &["a".into()]).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_excludes_concurrent_holders() {
        let storage = Arc::new(MemoryStorage::new());
        let guard = storage.lock("pipe").await.unwrap();

        let contender = Arc::clone(&storage);
        let waiter = tokio::spawn(async move { contender.lock("pipe").await.unwrap().key().to_owned() });

        // The second lock cannot be taken while the first guard lives.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.await.unwrap(), "pipe");
    }
}
