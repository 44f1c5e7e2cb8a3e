//! Versioned memoization cache with LRU eviction
//!
//! Structure: `IndexMap<StoreKey, Entry>` in recency order
//! - front = least recently used, back = most recently used
//! - O(1) lookup by key, eviction pops index 0
//! - bytes tracked through a [`MemoryBudget`], entry count checked against `max_items`
//!
//! There are two reasons to drop an entry:
//! - no room left: evict least recently used entries until both ceilings hold
//! - it can never be requested again because an entity it was computed from was
//!   edited or deleted: [`CacheStore::collect_garbage`] sweeps those, run once per
//!   interaction cycle rather than on every hit
//!
//! Stale values are never returned because a key embeds the versions it was
//! computed from; after an edit, a fresh computation produces a different key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::{ImageBuffer, Pixel};
use indexmap::IndexMap;
use log::{debug, error, trace, warn};

use super::budget::MemoryBudget;
use super::cache_key::CacheKey;
use super::versions::{EntityId, Version, VersionTable};

/// Size charged for values that have no natural byte size
pub const FALLBACK_BYTE_SIZE: usize = 64;

/// Approximate resident size of a cached value.
///
/// The default method charges [`FALLBACK_BYTE_SIZE`]; pixel buffers and numeric
/// arrays report their real payload.
pub trait ByteSize {
    fn byte_size(&self) -> usize {
        FALLBACK_BYTE_SIZE
    }
}

impl<P: Pixel> ByteSize for ImageBuffer<P, Vec<P::Subpixel>> {
    fn byte_size(&self) -> usize {
        let (w, h) = self.dimensions();
        w as usize * h as usize * P::CHANNEL_COUNT as usize * std::mem::size_of::<P::Subpixel>()
    }
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<f32> {
    fn byte_size(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

impl ByteSize for String {}

impl<T: ByteSize + ?Sized> ByteSize for Arc<T> {
    fn byte_size(&self) -> usize {
        (**self).byte_size()
    }
}

/// Expensive derived value the cache can memoize.
///
/// Implementors are small named structs holding only the parameters of one
/// computation. `compute_key` must be cheap and must capture every input the
/// value depends on; `compute_value` is only called on a miss.
pub trait CacheableComputation {
    type Value;

    fn compute_key(&self) -> CacheKey;

    fn compute_value(&self) -> Result<Self::Value>;
}

/// Cache statistics for monitoring
///
/// `computed_bytes`/`cached_bytes` cover the current GC generation only and are
/// reset by every sweep; the rest are cumulative.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    collected: AtomicU64,
    computed_bytes: AtomicU64,
    cached_bytes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hit(&self, bytes: usize) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.cached_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_miss(&self, bytes: usize) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.computed_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries removed by garbage collection
    pub fn collected(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    /// Bytes produced by misses since the last GC
    pub fn computed_bytes(&self) -> u64 {
        self.computed_bytes.load(Ordering::Relaxed)
    }

    /// Bytes served from hits since the last GC
    pub fn cached_bytes(&self) -> u64 {
        self.cached_bytes.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    fn reset_generation(&self) {
        self.computed_bytes.store(0, Ordering::Relaxed);
        self.cached_bytes.store(0, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.collected.store(0, Ordering::Relaxed);
        self.reset_generation();
    }
}

/// Frame resolution the entry was computed at; entries from another resolution never hit
pub type Scope = (u32, u32);

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct StoreKey {
    key: CacheKey,
    scope: Scope,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    size: usize,
}

/// Size- and count-bounded LRU memo table keyed by [`CacheKey`]
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Recency-ordered entries (front = oldest)
    entries: IndexMap<StoreKey, Entry<V>>,
    /// Live entity versions, shared with the collaborator
    versions: VersionTable,
    /// Resident byte accounting + ceiling
    budget: Arc<MemoryBudget>,
    /// Entry count ceiling
    max_items: usize,
    scope: Scope,
    /// While locked, misses are computed and returned but not retained
    locked: bool,
    /// Recompute-and-compare on hits, once per key per GC generation
    debug: bool,
    gc_iter: u64,
    last_check: HashMap<StoreKey, u64>,
    stats: Arc<CacheStats>,
}

impl<V> CacheStore<V>
where
    V: Clone + PartialEq + ByteSize,
{
    /// Create an empty store
    ///
    /// # Arguments
    /// * `versions` - Invalidation table shared with the entities
    /// * `budget` - Byte ceiling and resident byte counter
    /// * `max_items` - Maximum number of entries before eviction
    pub fn new(versions: VersionTable, budget: Arc<MemoryBudget>, max_items: usize) -> Self {
        debug!(
            "CacheStore created: max_items={}, max_bytes={}",
            max_items,
            budget.limit()
        );
        Self {
            entries: IndexMap::new(),
            versions,
            budget,
            max_items,
            scope: (0, 0),
            locked: false,
            debug: false,
            gc_iter: 0,
            last_check: HashMap::new(),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Return the memoized value for `item`, computing and retaining it on a miss
    pub fn fetch<C>(&mut self, item: &C) -> Result<V>
    where
        C: CacheableComputation<Value = V> + ?Sized,
    {
        self.fetch_kv(item).map(|(_, value)| value)
    }

    /// Like [`fetch`](Self::fetch) but also returns the key, so callers can derive
    /// keys of further computations from it.
    ///
    /// Errors from `compute_value` propagate unchanged; nothing is inserted.
    pub fn fetch_kv<C>(&mut self, item: &C) -> Result<(CacheKey, V)>
    where
        C: CacheableComputation<Value = V> + ?Sized,
    {
        let skey = StoreKey {
            key: item.compute_key(),
            scope: self.scope,
        };

        if let Some(index) = self.entries.get_index_of(&skey) {
            // Move to back (most recently used)
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            let entry = &self.entries[last];
            let value = entry.value.clone();
            self.stats.record_hit(entry.size);
            trace!("cache hit: {}", skey.key);

            if self.debug {
                self.check_consistency(item, &skey, &value);
            }
            return Ok((skey.key, value));
        }

        let value = item.compute_value()?;
        let size = value.byte_size();
        self.stats.record_miss(size);

        if self.locked {
            trace!("cache locked, not retaining: {}", skey.key);
            return Ok((skey.key, value));
        }

        let key = skey.key.clone();
        self.entries.insert(
            skey,
            Entry {
                value: value.clone(),
                size,
            },
        );
        self.budget.add_memory(size);
        debug!("cached: {} ({} bytes)", key, size);

        self.evict_lru_as_needed();
        Ok((key, value))
    }

    /// Debug mode: recompute a hit and compare. A mismatch is logged, never fatal.
    fn check_consistency<C>(&mut self, item: &C, skey: &StoreKey, cached: &V)
    where
        C: CacheableComputation<Value = V> + ?Sized,
    {
        if self.last_check.get(skey) == Some(&self.gc_iter) {
            return;
        }
        self.last_check.insert(skey.clone(), self.gc_iter);

        match item.compute_value() {
            Ok(fresh) if fresh != *cached => {
                error!("cache hit returned a value that differs from recomputation: {}", skey.key)
            }
            Ok(_) => {}
            Err(e) => warn!("debug recomputation of {} failed: {}", skey.key, e),
        }
    }

    /// Evict from the front until both ceilings hold
    fn evict_lru_as_needed(&mut self) {
        while self.budget.check_memory_limit() || self.entries.len() > self.max_items {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Evict least recently used entry
    ///
    /// Returns true if an entry was evicted, false if the store is empty.
    fn evict_oldest(&mut self) -> bool {
        let Some((skey, entry)) = self.entries.shift_remove_index(0) else {
            return false;
        };
        self.budget.free_memory(entry.size);
        self.last_check.remove(&skey);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        debug!("LRU evicted: {} (freed {} bytes)", skey.key, entry.size);
        true
    }

    /// Remove every entry whose dependencies are stale or whose scope is outdated.
    ///
    /// Returns the number of entries removed and starts a new GC generation.
    pub fn collect_garbage(&mut self) -> usize {
        let orig_len = self.entries.len();
        let orig_size = self.budget.usage();
        let versions = &self.versions;
        let scope = self.scope;
        let mut freed = 0usize;
        let mut removed_keys = Vec::new();

        self.entries.retain(|skey, entry| {
            let stale = skey.scope != scope || versions.is_stale(skey.key.deps());
            if stale {
                freed += entry.size;
                removed_keys.push(skey.clone());
            }
            !stale
        });

        self.budget.free_memory(freed);
        for skey in &removed_keys {
            self.last_check.remove(skey);
        }
        let removed = removed_keys.len();
        self.stats.collected.fetch_add(removed as u64, Ordering::Relaxed);

        debug!(
            "gc #{}: {} -> {} entries, {} -> {} bytes (computed {}, served {} this generation)",
            self.gc_iter,
            orig_len,
            self.entries.len(),
            orig_size,
            self.budget.usage(),
            self.stats.computed_bytes(),
            self.stats.cached_bytes()
        );

        self.gc_iter += 1;
        self.stats.reset_generation();
        removed
    }

    /// Record a new version of `id`
    pub fn update_id(&self, id: EntityId, version: Version) {
        self.versions.register(id, version);
    }

    /// Forget `id`; dependent entries go at the next GC
    pub fn delete_id(&self, id: &EntityId) {
        self.versions.unregister(id);
    }

    /// Handle to the invalidation table for entities to register with
    pub fn versions(&self) -> VersionTable {
        self.versions.clone()
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Run `f` with retention suppressed, restoring the previous lock state
    pub fn with_locked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_locked = self.locked;
        self.locked = true;
        let result = f(self);
        self.locked = was_locked;
        result
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
        if !enabled {
            self.last_check.clear();
        }
    }

    /// Change the resolution scope; entries of the old scope go at the next GC
    pub fn set_scope(&mut self, scope: Scope) {
        if self.scope != scope {
            debug!("cache scope: {:?} -> {:?}", self.scope, scope);
            self.scope = scope;
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn set_max_items(&mut self, max_items: usize) {
        self.max_items = max_items;
        self.evict_lru_as_needed();
    }

    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.budget.set_limit(max_bytes);
        self.evict_lru_as_needed();
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(&StoreKey {
            key: key.clone(),
            scope: self.scope,
        })
    }

    /// Keys in recency order, least recently used first
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys().map(|skey| &skey.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently retained
    pub fn resident_bytes(&self) -> usize {
        self.entries.values().map(|entry| entry.size).sum()
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn generation(&self) -> u64 {
        self.gc_iter
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn clear(&mut self) {
        let freed = self.resident_bytes();
        self.entries.clear();
        self.last_check.clear();
        self.budget.free_memory(freed);
        debug!("cache cleared ({} bytes freed)", freed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_key::{DependencySet, Descriptor};
    use anyhow::bail;
    use std::cell::Cell;

    /// Fake computation: value is a byte vector of `size` filled with `fill`
    struct Blob<'a> {
        deps: Vec<(&'static str, Version)>,
        tag: &'static str,
        size: usize,
        fill: u8,
        calls: &'a Cell<usize>,
    }

    impl<'a> Blob<'a> {
        fn new(tag: &'static str, deps: &[(&'static str, Version)], calls: &'a Cell<usize>) -> Self {
            Self {
                deps: deps.to_vec(),
                tag,
                size: 100,
                fill: 0,
                calls,
            }
        }
    }

    impl CacheableComputation for Blob<'_> {
        type Value = Arc<Vec<u8>>;

        fn compute_key(&self) -> CacheKey {
            let deps: DependencySet = self.deps.iter().map(|(id, v)| (EntityId::from(*id), *v)).collect();
            CacheKey::new(deps, Descriptor::new(self.tag))
        }

        fn compute_value(&self) -> Result<Self::Value> {
            self.calls.set(self.calls.get() + 1);
            Ok(Arc::new(vec![self.fill; self.size]))
        }
    }

    struct Failing;

    impl CacheableComputation for Failing {
        type Value = Arc<Vec<u8>>;

        fn compute_key(&self) -> CacheKey {
            CacheKey::new(DependencySet::new(), Descriptor::new("failing"))
        }

        fn compute_value(&self) -> Result<Self::Value> {
            bail!("decoder exploded")
        }
    }

    fn store(max_bytes: usize, max_items: usize) -> CacheStore<Arc<Vec<u8>>> {
        let budget = Arc::new(MemoryBudget::new("test cache", max_bytes));
        CacheStore::new(VersionTable::new(), budget, max_items)
    }

    #[test]
    fn test_hit_after_miss() {
        let mut cache = store(10_000, 10);
        cache.update_id("f1".into(), 0);
        let calls = Cell::new(0);

        let first = cache.fetch(&Blob::new("composite", &[("f1", 0)], &calls)).unwrap();
        let second = cache.fetch(&Blob::new("composite", &[("f1", 0)], &calls)).unwrap();

        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.resident_bytes(), 100);
        assert_eq!(cache.budget().usage(), 100);
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let mut cache = store(1_000_000, 3);
        let calls = Cell::new(0);

        for tag in ["a", "b", "c"] {
            cache.fetch(&Blob::new(tag, &[], &calls)).unwrap();
        }
        // touch "a" so "b" becomes the oldest
        cache.fetch(&Blob::new("a", &[], &calls)).unwrap();
        cache.fetch(&Blob::new("d", &[], &calls)).unwrap();

        let tags: Vec<&str> = cache.keys().map(|k| k.descriptor().tag()).collect();
        assert_eq!(tags, vec!["c", "a", "d"]);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_byte_ceiling_holds_after_every_insert() {
        let mut cache = store(350, 100);
        let calls = Cell::new(0);

        for tag in ["a", "b", "c", "d", "e", "f"] {
            cache.fetch(&Blob::new(tag, &[], &calls)).unwrap();
            assert!(cache.resident_bytes() <= 350);
            assert_eq!(cache.resident_bytes(), cache.budget().usage());
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_locked_store_does_not_retain() {
        let mut cache = store(10_000, 10);
        let calls = Cell::new(0);

        cache.lock();
        cache.fetch(&Blob::new("zoom", &[], &calls)).unwrap();
        cache.fetch(&Blob::new("zoom", &[], &calls)).unwrap();
        cache.unlock();

        assert_eq!(calls.get(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.budget().usage(), 0);

        let result = cache.with_locked(|c| c.fetch(&Blob::new("pan", &[], &calls)).map(|v| v.len()));
        assert_eq!(result.unwrap(), 100);
        assert!(!cache.is_locked());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_gc_removes_entries_of_edited_entities() {
        let mut cache = store(10_000, 10);
        let calls = Cell::new(0);
        cache.update_id("f1".into(), 0);
        cache.update_id("f2".into(), 0);

        cache.fetch(&Blob::new("thumb", &[("f1", 0)], &calls)).unwrap();
        cache.fetch(&Blob::new("thumb", &[("f2", 0)], &calls)).unwrap();

        cache.update_id("f1".into(), 1);
        assert_eq!(cache.collect_garbage(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.budget().usage(), 100);

        // same descriptor at the new version recomputes under a new key
        cache.fetch(&Blob::new("thumb", &[("f1", 1)], &calls)).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gc_removes_entries_of_deleted_entities_at_any_version() {
        let mut cache = store(10_000, 10);
        let calls = Cell::new(0);
        cache.update_id("f1".into(), 4);
        cache.update_id("f2".into(), 0);

        cache.fetch(&Blob::new("mask", &[("f2", 0), ("f1", 4)], &calls)).unwrap();
        cache.fetch(&Blob::new("thumb", &[("f1", 4)], &calls)).unwrap();
        cache.fetch(&Blob::new("thumb", &[("f2", 0)], &calls)).unwrap();

        cache.delete_id(&"f1".into());
        assert_eq!(cache.collect_garbage(), 2);
        assert!(cache.keys().all(|k| !k.deps().references(&"f1".into())));
    }

    #[test]
    fn test_scope_change_misses_and_collects() {
        let mut cache = store(10_000, 10);
        let calls = Cell::new(0);
        cache.set_scope((1920, 1080));
        cache.fetch(&Blob::new("bg", &[], &calls)).unwrap();

        cache.set_scope((1080, 1920));
        cache.fetch(&Blob::new("bg", &[], &calls)).unwrap();
        assert_eq!(calls.get(), 2);

        assert_eq!(cache.collect_garbage(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_errors_propagate_and_insert_nothing() {
        let mut cache = store(10_000, 10);
        let err = cache.fetch(&Failing).unwrap_err();
        assert!(err.to_string().contains("decoder exploded"));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses(), 0);
    }

    #[test]
    fn test_debug_mode_returns_cached_value_on_mismatch() {
        let mut cache = store(10_000, 10);
        cache.set_debug(true);
        let calls = Cell::new(0);

        let mut blob = Blob::new("nondeterministic", &[], &calls);
        let first = cache.fetch(&blob).unwrap();
        blob.fill = 9;
        let hit = cache.fetch(&blob).unwrap();
        assert!(Arc::ptr_eq(&first, &hit));
        // one miss + one throttled check
        assert_eq!(calls.get(), 2);

        cache.fetch(&blob).unwrap();
        assert_eq!(calls.get(), 2);

        cache.collect_garbage();
        cache.fetch(&blob).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_fetch_kv_returns_key() {
        let mut cache = store(10_000, 10);
        cache.update_id("f1".into(), 2);
        let calls = Cell::new(0);
        let (key, _) = cache.fetch_kv(&Blob::new("mask", &[("f1", 2)], &calls)).unwrap();
        assert_eq!(key.descriptor().tag(), "mask");
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_byte_size_of_images() {
        let rgba = image::RgbaImage::new(4, 3);
        assert_eq!(rgba.byte_size(), 48);
        let gray = image::GrayImage::new(4, 3);
        assert_eq!(gray.byte_size(), 12);
        assert_eq!(vec![0.0f32; 10].byte_size(), 40);
        assert_eq!(String::from("x").byte_size(), FALLBACK_BYTE_SIZE);
    }
}
