// 🗃️ Visitor Store - the two seams between the pipeline and storage
//
// VisitorSource: stream every visitor of a brand with a positive amount.
// ZscoreWriter:  overwrite the z-score of one visitor, nothing else.
//
// The SQLite implementation lives in db.rs. MemoryStore is the in-memory
// fake, CachedSource trades memory for fewer scans of the real store.

use crate::error::PipelineError;
use crate::model::{BrandId, StatsPair, Visitor, VisitorId};
use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Callback invoked once per streamed visitor. Returning an error stops the scan.
pub type VisitFn<'a> = dyn FnMut(Visitor) -> Result<(), PipelineError> + 'a;

pub trait VisitorSource {
    /// Stream all visitors of `brand` whose `summaries.amt > 0`.
    ///
    /// May be called any number of times; each call yields the same set of
    /// visitors as long as nobody else is writing to the brand.
    fn scan(&self, brand: &BrandId, visit: &mut VisitFn<'_>) -> Result<(), PipelineError>;
}

pub trait ZscoreWriter {
    /// Replace the `zscore` field of visitor `id`, leaving every other field alone
    fn update_zscore(&self, id: &VisitorId, zscore: &StatsPair) -> Result<()>;
}

impl<T: VisitorSource + ?Sized> VisitorSource for &T {
    fn scan(&self, brand: &BrandId, visit: &mut VisitFn<'_>) -> Result<(), PipelineError> {
        (**self).scan(brand, visit)
    }
}

impl<T: ZscoreWriter + ?Sized> ZscoreWriter for &T {
    fn update_zscore(&self, id: &VisitorId, zscore: &StatsPair) -> Result<()> {
        (**self).update_zscore(id, zscore)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory visitor store. Single-threaded, like the pipeline.
#[derive(Debug, Default)]
pub struct MemoryStore {
    visitors: RefCell<Vec<Visitor>>,
    zscores: RefCell<HashMap<VisitorId, StatsPair>>,
    fail_on: RefCell<Option<VisitorId>>,
    write_attempts: Cell<usize>,
    scans: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visitors(visitors: Vec<Visitor>) -> Self {
        let store = Self::new();
        *store.visitors.borrow_mut() = visitors;
        store
    }

    pub fn insert(&self, visitor: Visitor) {
        self.visitors.borrow_mut().push(visitor);
    }

    /// Make every write for `id` fail from now on
    pub fn fail_writes_for(&self, id: &str) {
        *self.fail_on.borrow_mut() = Some(VisitorId::from(id));
    }

    pub fn zscore(&self, id: &str) -> Option<StatsPair> {
        self.zscores.borrow().get(&VisitorId::from(id)).copied()
    }

    pub fn zscore_count(&self) -> usize {
        self.zscores.borrow().len()
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.get()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.get()
    }
}

impl VisitorSource for MemoryStore {
    fn scan(&self, brand: &BrandId, visit: &mut VisitFn<'_>) -> Result<(), PipelineError> {
        self.scans.set(self.scans.get() + 1);

        let visitors = self.visitors.borrow();
        for visitor in visitors
            .iter()
            .filter(|v| &v.brand_id == brand && v.has_positive_amount())
        {
            visit(visitor.clone())?;
        }
        Ok(())
    }
}

impl ZscoreWriter for MemoryStore {
    fn update_zscore(&self, id: &VisitorId, zscore: &StatsPair) -> Result<()> {
        self.write_attempts.set(self.write_attempts.get() + 1);

        if self.fail_on.borrow().as_ref() == Some(id) {
            return Err(anyhow!("simulated write failure for visitor {}", id));
        }
        if !self.visitors.borrow().iter().any(|v| &v.id == id) {
            return Err(anyhow!("visitor {} not found", id));
        }

        self.zscores.borrow_mut().insert(id.clone(), *zscore);
        Ok(())
    }
}

// ============================================================================
// CACHED SOURCE
// ============================================================================

/// Materializes a brand's filtered visitors on the first complete scan and
/// replays them afterwards. Only worth it when a brand fits in memory.
///
/// Writes go straight to the inner store; the cache never sees z-scores.
pub struct CachedSource<S> {
    inner: S,
    cache: RefCell<HashMap<BrandId, Vec<Visitor>>>,
}

impl<S> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        CachedSource {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self, brand: &BrandId) -> Option<usize> {
        self.cache.borrow().get(brand).map(Vec::len)
    }
}

impl<S: VisitorSource> VisitorSource for CachedSource<S> {
    fn scan(&self, brand: &BrandId, visit: &mut VisitFn<'_>) -> Result<(), PipelineError> {
        if let Some(visitors) = self.cache.borrow().get(brand) {
            for visitor in visitors {
                visit(visitor.clone())?;
            }
            return Ok(());
        }

        // Only a scan that ran to the end is cached
        let mut seen = Vec::new();
        self.inner.scan(brand, &mut |visitor: Visitor| {
            seen.push(visitor.clone());
            visit(visitor)
        })?;

        log::debug!("Cached {} visitors for brand {}", seen.len(), brand);
        self.cache.borrow_mut().insert(brand.clone(), seen);
        Ok(())
    }
}

impl<S: ZscoreWriter> ZscoreWriter for CachedSource<S> {
    fn update_zscore(&self, id: &VisitorId, zscore: &StatsPair) -> Result<()> {
        self.inner.update_zscore(id, zscore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(source: &impl VisitorSource, brand: &str) -> Vec<String> {
        let mut ids = Vec::new();
        source
            .scan(&BrandId::from(brand), &mut |v: Visitor| {
                ids.push(v.id.0);
                Ok(())
            })
            .unwrap();
        ids
    }

    fn sample_store() -> MemoryStore {
        MemoryStore::with_visitors(vec![
            Visitor::new("a1", "acme", 10.0, 1),
            Visitor::new("a2", "acme", 0.0, 4),
            Visitor::new("a3", "acme", 25.0, 2),
            Visitor::new("g1", "globex", 99.0, 9),
        ])
    }

    #[test]
    fn test_memory_scan_filters_brand_and_amount() {
        let store = sample_store();

        assert_eq!(collect(&store, "acme"), vec!["a1", "a3"]);
        assert_eq!(collect(&store, "globex"), vec!["g1"]);
        assert!(collect(&store, "initech").is_empty());
    }

    #[test]
    fn test_memory_scan_stops_on_callback_error() {
        let store = sample_store();
        let mut visited = 0;

        let result = store.scan(&BrandId::from("acme"), &mut |v: Visitor| {
            visited += 1;
            Err(PipelineError::TransformDomain {
                visitor_id: v.id,
                amt: v.summaries.amt,
                trn: v.summaries.trn,
            })
        });

        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_memory_write_and_injected_failure() {
        let store = sample_store();
        let z = StatsPair::new(0.5, -0.5);

        store.update_zscore(&VisitorId::from("a1"), &z).unwrap();
        assert_eq!(store.zscore("a1"), Some(z));

        store.fail_writes_for("a3");
        assert!(store.update_zscore(&VisitorId::from("a3"), &z).is_err());
        assert!(store.update_zscore(&VisitorId::from("nobody"), &z).is_err());

        assert_eq!(store.write_attempts(), 3);
        assert_eq!(store.zscore_count(), 1);
    }

    #[test]
    fn test_cached_source_scans_inner_once() {
        let store = sample_store();
        let cached = CachedSource::new(&store);

        assert_eq!(collect(&cached, "acme"), vec!["a1", "a3"]);
        assert_eq!(collect(&cached, "acme"), vec!["a1", "a3"]);
        assert_eq!(collect(&cached, "acme"), vec!["a1", "a3"]);

        assert_eq!(store.scan_count(), 1);
        assert_eq!(cached.cached_len(&BrandId::from("acme")), Some(2));

        collect(&cached, "globex");
        assert_eq!(store.scan_count(), 2);
    }

    #[test]
    fn test_cached_source_skips_partial_scans() {
        let store = sample_store();
        let cached = CachedSource::new(&store);

        let result = cached.scan(&BrandId::from("acme"), &mut |_v: Visitor| {
            Err(PipelineError::Source(anyhow!("stop")))
        });

        assert!(result.is_err());
        assert_eq!(cached.cached_len(&BrandId::from("acme")), None);
    }

    #[test]
    fn test_cached_source_writes_through() {
        let store = sample_store();
        let cached = CachedSource::new(&store);

        cached
            .update_zscore(&VisitorId::from("g1"), &StatsPair::new(1.0, 1.0))
            .unwrap();

        assert_eq!(store.zscore("g1"), Some(StatsPair::new(1.0, 1.0)));
    }
}
