// Shared translation cache with in-flight request de-duplication
//
// Concurrent expander workers share one cache. Completed translations live in
// `done`; a per-key async gate serializes backend calls so the same
// (text, source, target) key is never in flight twice.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;

/// (text, source locale, target locale)
pub type CacheKey = (String, String, String);

#[derive(Debug, Default)]
pub struct TranslationCache {
    done: DashMap<CacheKey, String>,
    gates: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Cached result, if any, without touching the backend.
    pub fn peek(&self, key: &CacheKey) -> Option<String> {
        self.done.get(key).map(|hit| hit.clone())
    }

    /// Pre-populate an entry (warm-cache runs, tests).
    pub fn insert(&self, key: CacheKey, text: String) {
        self.done.insert(key, text);
    }

    /// Return the cached translation or invoke `translate` exactly once per
    /// key, even under concurrent callers. Failures are not cached.
    pub async fn get_or_translate<F, Fut>(&self, key: CacheKey, translate: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(hit) = self.peek(&key) {
            return Ok(hit);
        }

        // Clone the gate out of the map entry before awaiting; holding a
        // dashmap guard across an await point can deadlock.
        let gate = {
            let entry = self
                .gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };
        let _held = gate.lock().await;

        // Another worker may have filled the entry while we waited.
        if let Some(hit) = self.peek(&key) {
            return Ok(hit);
        }

        let text = translate().await?;
        self.done.insert(key, text.clone());
        Ok(text)
    }
}
