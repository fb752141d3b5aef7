use super::metrics::{ASSEMBLY_CACHE_HITS_TOTAL, ASSEMBLY_CACHE_MISSES_TOTAL};
use crate::types::{FlattenedRecord, RequestDomainId};
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Assembled record lists per requested domain, shared between the store
/// (which invalidates) and the assembler (which fills).
///
/// Every invalidation bumps the domain's generation. A list read under an
/// older generation is never cached, so a read that overlaps a commit
/// cannot put the pre-commit list back.
pub struct AssemblyCache {
    records: Cache<RequestDomainId, Arc<Vec<FlattenedRecord>>>,
    generations: Mutex<HashMap<RequestDomainId, u64>>,
}

impl AssemblyCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        tracing::info!("[cache] Initialized (Capacity: {}, TTL: {}s)", capacity, ttl.as_secs());
        Self {
            // Moka 自带 W-TinyLFU 淘汰，容量与过期时间由配置决定
            records: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
            generations: Mutex::new(HashMap::new()),
        }
    }

    // 计数器本身不会处于中间状态，锁中毒时直接取回数据
    fn generations(&self) -> MutexGuard<'_, HashMap<RequestDomainId, u64>> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: RequestDomainId) -> Option<Arc<Vec<FlattenedRecord>>> {
        let hit = self.records.get(&id);
        if hit.is_some() {
            ASSEMBLY_CACHE_HITS_TOTAL.inc();
        } else {
            ASSEMBLY_CACHE_MISSES_TOTAL.inc();
        }
        hit
    }

    /// Generation to read under before fetching a domain's records.
    pub fn generation(&self, id: RequestDomainId) -> u64 {
        self.generations().get(&id).copied().unwrap_or(0)
    }

    /// Cache `records` unless the domain was invalidated after `generation`
    /// was taken. Returns whether the list was cached.
    pub fn insert(&self, id: RequestDomainId, generation: u64, records: Arc<Vec<FlattenedRecord>>) -> bool {
        let generations = self.generations();
        if generations.get(&id).copied().unwrap_or(0) != generation {
            tracing::debug!("[cache] Requested domain {} changed during assembly, not caching", id);
            return false;
        }
        self.records.insert(id, records);
        true
    }

    pub fn invalidate(&self, id: RequestDomainId) {
        let mut generations = self.generations();
        *generations.entry(id).or_insert(0) += 1;
        self.records.invalidate(&id);
    }
}

impl Default for AssemblyCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(300))
    }
}
