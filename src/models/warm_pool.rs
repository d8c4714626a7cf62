//! Pool of warm models.
//!
//! Holds the handles produced by completed warmups, bounded by
//! `max_warm_models`. When full, the lowest-scored entry is unloaded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use super::loader::{LoadedHandle, ModelLoader};
use crate::config::SharedConfig;
use crate::types::{ModelId, RequestPriority};

#[derive(Debug)]
struct WarmEntry {
    handle: LoadedHandle,
    priority: RequestPriority,
    last_used: Instant,
    use_count: u64,
}

impl WarmEntry {
    /// Eviction score (lower = evict first).
    fn eviction_score(&self, now: Instant) -> u64 {
        let priority_weight = (self.priority.rank() as u64) * 1_000_000;
        let recency_penalty = now.saturating_duration_since(self.last_used).as_secs().min(999);
        let usage_weight = self.use_count.min(1000);

        // Higher priority + more recent + more used = keep longer
        priority_weight + usage_weight + 1000 - recency_penalty
    }
}

#[derive(Debug, Default, Clone)]
pub struct WarmPoolMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub unload_failures: u64,
}

pub struct WarmPool {
    config: SharedConfig,
    entries: Arc<RwLock<HashMap<ModelId, WarmEntry>>>,
    metrics: Arc<RwLock<WarmPoolMetrics>>,
}

impl WarmPool {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(WarmPoolMetrics::default())),
        }
    }

    pub async fn contains(&self, model_id: &ModelId) -> bool {
        self.entries.read().await.contains_key(model_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn warm_models(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.entries.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Mark a model as used. Returns whether it was warm.
    pub async fn touch(&self, model_id: &ModelId) -> bool {
        let hit = match self.entries.write().await.get_mut(model_id) {
            Some(entry) => {
                entry.last_used = Instant::now();
                entry.use_count += 1;
                true
            }
            None => false,
        };
        let mut metrics = self.metrics.write().await;
        if hit {
            metrics.hits += 1;
        } else {
            metrics.misses += 1;
        }
        hit
    }

    /// Add a freshly loaded handle, unloading the lowest-scored entries while
    /// the pool is at capacity.
    pub async fn admit(&self, handle: LoadedHandle, priority: RequestPriority, loader: &dyn ModelLoader) {
        let capacity = self.config.current().max_warm_models;
        let evicted = {
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            let mut evicted = Vec::new();
            if let Some(previous) = entries.remove(&handle.model_id()) {
                evicted.push(previous.handle);
            }
            while entries.len() >= capacity {
                let victim = entries
                    .iter()
                    .min_by_key(|(id, e)| (e.eviction_score(now), **id))
                    .map(|(id, _)| *id);
                match victim.and_then(|id| entries.remove(&id)) {
                    Some(entry) => evicted.push(entry.handle),
                    None => break,
                }
            }
            entries.insert(
                handle.model_id(),
                WarmEntry { handle, priority, last_used: now, use_count: 0 },
            );
            evicted
        };

        for old in evicted {
            self.unload(old, loader).await;
        }
    }

    /// Unload every warm model.
    pub async fn drain(&self, loader: &dyn ModelLoader) {
        let handles: Vec<LoadedHandle> =
            self.entries.write().await.drain().map(|(_, e)| e.handle).collect();
        for handle in handles {
            self.unload(handle, loader).await;
        }
    }

    async fn unload(&self, handle: LoadedHandle, loader: &dyn ModelLoader) {
        let result = loader.unload(handle).await;
        let mut metrics = self.metrics.write().await;
        metrics.evictions += 1;
        if let Err(e) = result {
            metrics.unload_failures += 1;
            tracing::warn!(model_id = %handle.model_id(), error = %e, "Failed to unload evicted model");
        } else {
            tracing::debug!(model_id = %handle.model_id(), "Evicted warm model");
        }
    }

    pub async fn metrics(&self) -> WarmPoolMetrics {
        self.metrics.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarmupConfig;
    use crate::models::LoadError;
    use crate::types::ResourceRequirements;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingLoader {
        unloads: AtomicU64,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, model_id: &ModelId, _: &ResourceRequirements) -> Result<LoadedHandle, LoadError> {
            Ok(LoadedHandle::new(*model_id, 1))
        }

        async fn unload(&self, _handle: LoadedHandle) -> Result<(), LoadError> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(max_warm_models: usize) -> WarmPool {
        let config = WarmupConfig { max_warm_models, ..Default::default() };
        WarmPool::new(SharedConfig::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_admit_and_touch() {
        let pool = pool(2);
        let loader = CountingLoader::default();
        let id = ModelId::new();
        pool.admit(LoadedHandle::new(id, 1), RequestPriority::Medium, &loader).await;

        assert!(pool.contains(&id).await);
        assert!(pool.touch(&id).await);
        assert!(!pool.touch(&ModelId::new()).await);
        let metrics = pool.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_lowest_priority() {
        let pool = pool(2);
        let loader = CountingLoader::default();
        let low = ModelId::new();
        let high = ModelId::new();
        let critical = ModelId::new();
        pool.admit(LoadedHandle::new(low, 1), RequestPriority::Low, &loader).await;
        pool.admit(LoadedHandle::new(high, 2), RequestPriority::High, &loader).await;
        pool.admit(LoadedHandle::new(critical, 3), RequestPriority::Critical, &loader).await;

        assert_eq!(pool.len().await, 2);
        assert!(!pool.contains(&low).await);
        assert!(pool.contains(&high).await);
        assert!(pool.contains(&critical).await);
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_readmit_replaces_previous_handle() {
        let pool = pool(3);
        let loader = CountingLoader::default();
        let id = ModelId::new();
        pool.admit(LoadedHandle::new(id, 1), RequestPriority::Low, &loader).await;
        pool.admit(LoadedHandle::new(id, 2), RequestPriority::Low, &loader).await;
        assert_eq!(pool.len().await, 1);
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_unloads_everything() {
        let pool = pool(3);
        let loader = CountingLoader::default();
        for i in 0..3 {
            pool.admit(LoadedHandle::new(ModelId::new(), i), RequestPriority::Medium, &loader).await;
        }
        pool.drain(&loader).await;
        assert!(pool.is_empty().await);
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 3);
    }
}
