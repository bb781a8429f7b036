//! In-memory backend for tests and embedded use.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{Backend, KVError, KVResult, Record, Version};

#[derive(Default)]
struct State {
    data: BTreeMap<String, (Vec<u8>, u64)>,
    // Store-wide modify counter, bumped by every write.
    index: u64,
}

impl State {
    fn write(&mut self, key: &str, value: &[u8]) {
        self.index += 1;
        self.data
            .insert(key.to_string(), (value.to_vec(), self.index));
    }
}

/// An in-memory backend backed by a sorted map.
///
/// Versions come from a store-wide modify counter, like Consul's
/// `ModifyIndex`. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> KVResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| KVError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> KVResult<Option<Record>> {
        let state = self.lock()?;
        Ok(state
            .data
            .get(key)
            .map(|(v, idx)| Record::new(key, v.clone(), Version::from_raw(*idx))))
    }

    async fn put(&self, key: &str, value: &[u8]) -> KVResult<()> {
        self.lock()?.write(key, value);
        Ok(())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: &[u8],
        expected: Version,
    ) -> KVResult<bool> {
        let mut state = self.lock()?;
        let current = state
            .data
            .get(key)
            .map(|(_, idx)| Version::from_raw(*idx))
            .unwrap_or(Version::ABSENT);
        if current != expected {
            return Ok(false);
        }
        state.write(key, value);
        Ok(true)
    }

    async fn scan(&self, prefix: &str) -> KVResult<Vec<Record>> {
        let state = self.lock()?;
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, idx))| Record::new(k.clone(), v.clone(), Version::from_raw(*idx)))
            .collect())
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        let mut state = self.lock()?;
        if state.data.remove(key).is_some() {
            state.index += 1;
        }
        Ok(())
    }
}
