use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use ensemble_core::InferenceError;

struct CacheEntry {
    value: String,
    stored_at: Instant,
}

/// Memoizes raw model responses keyed by (model, prompt hash) with a fixed
/// TTL. Prompts embed price and change, so hits mainly serve rapid repeated
/// requests for the same symbol. Expired entries are evicted lazily on read.
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached response if fresh, otherwise run `compute` and
    /// store its result. A failed compute propagates to the caller and is
    /// NOT stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        model: &str,
        prompt: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<String, InferenceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, InferenceError>>,
    {
        let key = cache_key(model, prompt);

        if let Some(entry) = self.entries.get(&key) {
            if entry.stored_at.elapsed() < ttl {
                tracing::debug!(model, "inference cache hit");
                return Ok(entry.value.clone());
            }
        }
        self.entries
            .remove_if(&key, |_, entry| entry.stored_at.elapsed() >= ttl);

        let value = compute().await?;
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(value)
    }
}

fn cache_key(model: &str, prompt: &str) -> String {
    format!("{model}:{}", hex::encode(Sha256::digest(prompt.as_bytes())))
}
