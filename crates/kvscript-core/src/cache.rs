//! Content-addressed cache of compiled scripts.
//!
//! Keyed by the SHA-256 digest of the script text, so a changed script is
//! simply a new key and entries never need invalidation. Capacity-bounded
//! with least-recently-used eviction; no time-based expiry.
//!
//! Population is single-flight: every caller for a digest shares one
//! `OnceCell`, so concurrent misses compile once and the rest await that
//! result. A failed compile leaves the cell empty and drops the slot, so the
//! next caller compiles again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::sandbox::{CompiledUnit, ScriptCompiler, ScriptResult};
use crate::script::{Digest, Script};

/// Default number of compiled units kept.
pub const DEFAULT_CAPACITY: usize = 100;

type UnitCell = Arc<OnceCell<Arc<CompiledUnit>>>;

struct Slot {
    cell: UnitCell,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<Digest, Slot>,
    tick: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls served without compiling.
    pub hits: u64,
    /// Calls that ran the compiler.
    pub misses: u64,
    pub compile_failures: u64,
    pub evictions: u64,
    /// Compiled units currently held.
    pub entries: usize,
}

/// Bounded, single-flight cache of [`CompiledUnit`]s.
pub struct CompiledScriptCache {
    compiler: Arc<ScriptCompiler>,
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    compile_failures: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for CompiledScriptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScriptCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CompiledScriptCache {
    /// Create a cache holding at most `capacity` units (minimum 1).
    pub fn new(compiler: Arc<ScriptCompiler>, capacity: usize) -> Self {
        Self {
            compiler,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compile_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the compiled unit for `script`, compiling it at most once
    /// across concurrent callers.
    pub async fn get_or_compile(&self, script: &Script) -> ScriptResult<Arc<CompiledUnit>> {
        let digest = script.digest();
        let cell = self.slot_for(digest);

        if let Some(unit) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(digest = %digest.short(), "compiled script cache hit");
            return Ok(unit.clone());
        }

        let compiled_here = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                compiled_here.store(true, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(digest = %digest.short(), "compiled script cache miss");
                self.compiler.compile(script).map(Arc::new)
            })
            .await;

        match result {
            Ok(unit) => {
                let unit = unit.clone();
                if compiled_here.load(Ordering::Relaxed) {
                    self.enforce_capacity();
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(unit)
            }
            Err(err) => {
                self.compile_failures.fetch_add(1, Ordering::Relaxed);
                self.discard_failed(digest, &cell);
                Err(err)
            }
        }
    }

    /// Number of compiled units currently held.
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|s| s.cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a compiled unit for `digest` is currently held.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.lock()
            .slots
            .get(digest)
            .is_some_and(|s| s.cell.initialized())
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Find or create the slot for `digest` and mark it most recently used.
    fn slot_for(&self, digest: Digest) -> UnitCell {
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        let slot = state.slots.entry(digest).or_insert_with(|| Slot {
            cell: Arc::new(OnceCell::new()),
            last_used: tick,
        });
        slot.last_used = tick;
        slot.cell.clone()
    }

    /// Evict least-recently-used compiled units until within capacity.
    /// Slots still compiling are neither counted nor evicted.
    fn enforce_capacity(&self) {
        let mut state = self.lock();
        loop {
            let ready: Vec<(&Digest, u64)> = state
                .slots
                .iter()
                .filter(|(_, s)| s.cell.initialized())
                .map(|(d, s)| (d, s.last_used))
                .collect();
            if ready.len() <= self.capacity {
                return;
            }
            let Some(victim) = ready
                .into_iter()
                .min_by_key(|(_, last_used)| *last_used)
                .map(|(d, _)| *d)
            else {
                return;
            };
            state.slots.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %victim.short(), "evicted compiled script");
        }
    }

    /// Remove a slot whose compilation failed, unless someone already
    /// replaced or filled it.
    fn discard_failed(&self, digest: Digest, cell: &UnitCell) {
        let mut state = self.lock();
        let stale = state
            .slots
            .get(&digest)
            .is_some_and(|s| Arc::ptr_eq(&s.cell, cell) && !s.cell.initialized());
        if stale {
            state.slots.remove(&digest);
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Slot bookkeeping is updated in single statements; a poisoned lock
        // still guards a consistent map.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ScriptError;

    fn cache(capacity: usize) -> CompiledScriptCache {
        CompiledScriptCache::new(Arc::new(ScriptCompiler::default()), capacity)
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let cache = cache(10);
        let script = Script::new("1 + 1");
        let a = cache.get_or_compile(&script).await.unwrap();
        let b = cache.get_or_compile(&script).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = cache(2);
        let a = Script::new("1");
        let b = Script::new("2");
        let c = Script::new("3");
        cache.get_or_compile(&a).await.unwrap();
        cache.get_or_compile(&b).await.unwrap();
        // Touch `a` so `b` becomes least recently used.
        cache.get_or_compile(&a).await.unwrap();
        cache.get_or_compile(&c).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&a.digest()));
        assert!(!cache.contains(&b.digest()));
        assert!(cache.contains(&c.digest()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_compile_failures_are_not_cached() {
        let cache = cache(10);
        let bad = Script::new("let = ;");
        for _ in 0..3 {
            assert!(matches!(
                cache.get_or_compile(&bad).await,
                Err(ScriptError::Compile(_))
            ));
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.compile_failures, 3);
        assert_eq!(stats.entries, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_forces_recompile() {
        let cache = cache(10);
        let script = Script::new("40 + 2");
        cache.get_or_compile(&script).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_compile(&script).await.unwrap();
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_capacity_has_floor_of_one() {
        assert_eq!(cache(0).capacity(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compile_once() {
        let cache = Arc::new(cache(10));
        let script = Script::new("let total = 0; for i in 0..100 { total += i; } total");
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                let script = script.clone();
                tokio::spawn(async move { cache.get_or_compile(&script).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            assert!(task.unwrap().is_ok());
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 49);
    }
}
