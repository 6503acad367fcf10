//! Compiled pipeline cache keyed by operation and shader variant.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{OpId, VariantFlags};
use crate::ComputeResult;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that compiled.
    pub misses: u64,
    /// Entries held.
    pub entries: usize,
}

/// Memoizes compiled pipelines per `(OpId, VariantFlags)`.
///
/// Entries live until [`clear`](Self::clear); a device change produces a new
/// cache, so a variant compiled for one device is never reused on another.
pub struct PipelineCache<P> {
    entries: HashMap<(OpId, VariantFlags), Arc<P>>,
    hits: u64,
    misses: u64,
}

impl<P> PipelineCache<P> {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), hits: 0, misses: 0 }
    }

    /// Returns the cached pipeline, compiling it on first use.
    ///
    /// A failed compile caches nothing.
    pub fn get_or_compile<F>(&mut self, op: OpId, flags: VariantFlags, compile: F) -> ComputeResult<Arc<P>>
    where
        F: FnOnce() -> ComputeResult<P>,
    {
        if let Some(p) = self.entries.get(&(op, flags)) {
            self.hits += 1;
            return Ok(Arc::clone(p));
        }
        self.misses += 1;
        let pipeline = Arc::new(compile()?);
        debug!(op = op.name(), variant = %flags, "compiled pipeline");
        self.entries.insert((op, flags), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Whether a variant is compiled.
    pub fn contains(&self, op: OpId, flags: VariantFlags) -> bool {
        self.entries.contains_key(&(op, flags))
    }

    /// Number of compiled variants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every compiled pipeline.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "pipeline cache cleared");
        }
        self.entries.clear();
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits, misses: self.misses, entries: self.entries.len() }
    }
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ComputeError;

    #[test]
    fn test_compiles_once_per_variant() {
        let mut cache = PipelineCache::new();
        let mut compiles = 0;

        for _ in 0..3 {
            cache.get_or_compile(OpId::Histogram, VariantFlags::empty(), || {
                compiles += 1;
                Ok("base")
            }).unwrap();
        }
        assert_eq!(compiles, 1);

        let p = cache.get_or_compile(OpId::Histogram, VariantFlags::SUBGROUPS, || Ok("subgroups")).unwrap();
        assert_eq!(*p, "subgroups");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 2, entries: 2 });
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        let err = cache.get_or_compile(OpId::Uber, VariantFlags::empty(), || {
            Err(ComputeError::ValidationError("bad shader".into()))
        });
        assert!(err.is_err());
        assert!(!cache.contains(OpId::Uber, VariantFlags::empty()));
    }

    #[test]
    fn test_clear_forces_recompile() {
        let mut cache = PipelineCache::new();
        cache.get_or_compile(OpId::Rotation, VariantFlags::empty(), || Ok(1)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        let p = cache.get_or_compile(OpId::Rotation, VariantFlags::empty(), || Ok(2)).unwrap();
        assert_eq!(*p, 2);
    }
}
