// 🔁 Z-Score Pipeline - mean → std-dev → write, one brand at a time
//
//   Start → MeanComputed → DispersionComputed → WritesComplete
//     └──────────┴────────────────┴──────────────→ Failed
//
// A stage only runs when the previous one succeeded. Writes are not atomic:
// if pass 3 fails halfway, the visitors before the failure keep their new
// z-score and the error says how many there were.
//
// Callers must not run the pipeline concurrently for the same brand.

use crate::error::PipelineError;
use crate::model::{BrandId, StatsPair, Visitor};
use crate::stats::{compute_means, compute_std_devs, ZScorer};
use crate::store::{CachedSource, VisitorSource, ZscoreWriter};
use crate::transform::log_transform;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    Start,
    MeanComputed,
    DispersionComputed,
    WritesComplete,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Start => "start",
            PipelineStage::MeanComputed => "mean_computed",
            PipelineStage::DispersionComputed => "dispersion_computed",
            PipelineStage::WritesComplete => "writes_complete",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub brand_id: BrandId,
    pub mean: StatsPair,
    pub std_dev: StatsPair,
    pub visitors_scored: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "Brand {}: {} visitors scored, mean {}, std-dev {}",
            self.brand_id, self.visitors_scored, self.mean, self.std_dev
        )
    }
}

/// Pass 3: score every visitor of `brand` and persist it, one write each.
///
/// Stops at the first failed write. Returns the number of visitors written.
pub fn write_zscores<S>(store: &S, brand: &BrandId, scorer: &ZScorer) -> Result<usize, PipelineError>
where
    S: VisitorSource + ZscoreWriter + ?Sized,
{
    let mut written = 0;

    store.scan(brand, &mut |visitor: Visitor| {
        let zscore = scorer.score(log_transform(&visitor)?);

        if let Err(source) = store.update_zscore(&visitor.id, &zscore) {
            log::warn!(
                "Failed to update visitor {} after {} writes: {}",
                visitor.id,
                written,
                source
            );
            return Err(PipelineError::PersistenceFailure {
                visitor_id: visitor.id,
                written,
                source,
            });
        }

        written += 1;
        Ok(())
    })?;

    Ok(written)
}

pub struct ZscorePipeline<S> {
    store: S,
    cache_partition: bool,
    stage: Cell<PipelineStage>,
}

impl<S> ZscorePipeline<S>
where
    S: VisitorSource + ZscoreWriter,
{
    pub fn new(store: S) -> Self {
        ZscorePipeline {
            store,
            cache_partition: false,
            stage: Cell::new(PipelineStage::Start),
        }
    }

    /// Keep each brand's visitors in memory between passes instead of
    /// scanning the store three times
    pub fn with_partition_cache(mut self, enabled: bool) -> Self {
        self.cache_partition = enabled;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stage reached by the most recent run
    pub fn stage(&self) -> PipelineStage {
        self.stage.get()
    }

    /// Recompute and persist z-scores for every qualifying visitor of `brand`
    pub fn run(&self, brand: &BrandId) -> Result<RunReport, PipelineError> {
        self.stage.set(PipelineStage::Start);
        log::info!("Computing z-scores for brand {}", brand);

        let result = if self.cache_partition {
            let cached = CachedSource::new(&self.store);
            let result = self.run_passes(&cached, brand);
            log::debug!(
                "Brand {}: partition cache held {} visitors",
                brand,
                cached.cached_len(brand).unwrap_or(0)
            );
            result
        } else {
            self.run_passes(&self.store, brand)
        };

        if let Err(e) = &result {
            self.stage.set(PipelineStage::Failed);
            log::error!(
                "Z-score run for brand {} failed ({}): {} ({} visitors already updated)",
                brand,
                e.kind(),
                e,
                e.writes_applied()
            );
        }

        result
    }

    /// `true` iff all three passes completed and every write succeeded
    pub fn run_update(&self, brand: &BrandId) -> bool {
        self.run(brand).is_ok()
    }

    fn run_passes<T>(&self, source: &T, brand: &BrandId) -> Result<RunReport, PipelineError>
    where
        T: VisitorSource + ZscoreWriter,
    {
        let started_at = Utc::now();

        let mean = compute_means(source, brand)?;
        self.advance(brand, PipelineStage::MeanComputed);

        let std_dev = compute_std_devs(source, brand, &mean)?;
        self.advance(brand, PipelineStage::DispersionComputed);

        let scorer = ZScorer::new(mean, std_dev)?;
        let visitors_scored = write_zscores(source, brand, &scorer)?;
        self.advance(brand, PipelineStage::WritesComplete);

        let report = RunReport {
            brand_id: brand.clone(),
            mean,
            std_dev,
            visitors_scored,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!("{}", report.summary());
        Ok(report)
    }

    fn advance(&self, brand: &BrandId, stage: PipelineStage) {
        log::debug!("Brand {}: {} → {}", brand, self.stage.get().as_str(), stage.as_str());
        self.stage.set(stage);
    }
}
