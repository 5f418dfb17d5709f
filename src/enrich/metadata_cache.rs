use crate::domain::{MetadataLookup, OrchestrationMetadata};
use crate::rancher::ResolveMetadata;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Decides which entry, if any, leaves the cache when a new one arrives.
pub trait EvictionPolicy: Send + fmt::Debug {
    fn on_hit(&mut self, key: &str);
    /// Record a fresh key and return the key to evict, if any.
    fn on_insert(&mut self, key: &str) -> Option<String>;
}

/// Keep everything for the life of the process.
#[derive(Debug, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn on_hit(&mut self, _key: &str) {}

    fn on_insert(&mut self, _key: &str) -> Option<String> {
        None
    }
}

/// Least-recently-used eviction with a fixed capacity.
///
/// Every touch stamps the key with a new generation; the oldest generation
/// is the eviction candidate. Hits and inserts are O(log n).
#[derive(Debug)]
pub struct Lru {
    capacity: NonZeroUsize,
    generation: u64,
    stamps: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
}

impl Lru {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            generation: 0,
            stamps: HashMap::with_capacity(capacity.get()),
            order: BTreeMap::new(),
        }
    }

    fn touch(&mut self, key: &str) {
        self.generation += 1;
        match self.stamps.get_mut(key) {
            Some(stamp) => {
                let previous = *stamp;
                if let Some(k) = self.order.remove(&previous) {
                    self.order.insert(self.generation, k);
                }
                *stamp = self.generation;
            }
            None => {
                self.stamps.insert(key.to_string(), self.generation);
                self.order.insert(self.generation, key.to_string());
            }
        }
    }
}

impl EvictionPolicy for Lru {
    fn on_hit(&mut self, key: &str) {
        if self.stamps.contains_key(key) {
            self.touch(key);
        }
    }

    fn on_insert(&mut self, key: &str) -> Option<String> {
        self.touch(key);
        if self.stamps.len() <= self.capacity.get() {
            return None;
        }
        let (_, oldest) = self.order.pop_first()?;
        self.stamps.remove(&oldest);
        Some(oldest)
    }
}

/// Build the policy for a configured capacity; zero means unbounded.
pub fn policy_for_capacity(capacity: usize) -> Box<dyn EvictionPolicy> {
    match NonZeroUsize::new(capacity) {
        Some(capacity) => Box::new(Lru::new(capacity)),
        None => Box::new(Unbounded),
    }
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, OrchestrationMetadata>,
    policy: Box<dyn EvictionPolicy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Fill-on-miss cache in front of a metadata resolver.
///
/// Successful resolutions are kept and never refreshed. `Absent` results are
/// not stored, so the next message for that container tries again.
pub struct MetadataCache {
    resolver: Arc<dyn ResolveMetadata>,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MetadataCache {
    pub fn new(resolver: Arc<dyn ResolveMetadata>) -> Self {
        Self::with_policy(resolver, Box::new(Unbounded))
    }

    pub fn with_policy(resolver: Arc<dyn ResolveMetadata>, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            resolver,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                policy,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub async fn resolve_or_fetch(&self, container_id: &str) -> MetadataLookup {
        if let Some(metadata) = self.get(container_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return MetadataLookup::Found(metadata);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        // No lock is held across the remote call; racing fills are harmless.
        let lookup = self.resolver.resolve(container_id).await;
        if let MetadataLookup::Found(metadata) = &lookup {
            self.store(container_id, metadata.clone());
        }
        lookup
    }

    pub fn get(&self, container_id: &str) -> Option<OrchestrationMetadata> {
        let mut state = self.state.lock();
        let metadata = state.entries.get(container_id).cloned()?;
        state.policy.on_hit(container_id);
        Some(metadata)
    }

    fn store(&self, container_id: &str, metadata: OrchestrationMetadata) {
        let mut state = self.state.lock();
        if state
            .entries
            .insert(container_id.to_string(), metadata)
            .is_some()
        {
            state.policy.on_hit(container_id);
            return;
        }

        if let Some(evicted) = state.policy.on_insert(container_id) {
            state.entries.remove(&evicted);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(container_id = %evicted, "Evicted rancher metadata from cache");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
