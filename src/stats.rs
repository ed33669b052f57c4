// 📊 Brand Statistics - log-space mean, sample std-dev and z-scores
//
// Pass 1: mean of log10(amt) and log10(trn) over the brand.
// Pass 2: sample standard deviation (n - 1) around that mean.
// Pass 3 uses ZScorer, which owns the single mean/std-dev pair of the run.
//
// Each pass is one streaming scan. Nothing is held in memory besides the
// running sums.

use crate::error::{PipelineError, Quantity};
use crate::model::{BrandId, LogPair, StatsPair, Visitor};
use crate::store::VisitorSource;
use crate::transform::log_transform;

// ============================================================================
// MEAN
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MeanAccumulator {
    sum_amt: f64,
    sum_trn: f64,
    count: usize,
}

impl MeanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pair: LogPair) {
        self.sum_amt += pair.log_amt;
        self.sum_trn += pair.log_trn;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(&self, brand: &BrandId) -> Result<StatsPair, PipelineError> {
        if self.count == 0 {
            return Err(PipelineError::EmptyPartition {
                brand_id: brand.clone(),
            });
        }

        let n = self.count as f64;
        Ok(StatsPair::new(self.sum_amt / n, self.sum_trn / n))
    }
}

// ============================================================================
// DISPERSION
// ============================================================================

#[derive(Debug, Clone)]
pub struct DispersionAccumulator {
    mean: StatsPair,
    sum_sq_amt: f64,
    sum_sq_trn: f64,
    count: usize,
    // First value seen and whether any later value differs from it. A
    // quantity that never varies has a std-dev of exactly zero, whatever
    // rounding in the mean left behind in the sum of squares.
    first: Option<LogPair>,
    amt_varies: bool,
    trn_varies: bool,
}

impl DispersionAccumulator {
    /// `mean` must come from a successful `MeanAccumulator::finish`
    pub fn new(mean: StatsPair) -> Self {
        DispersionAccumulator {
            mean,
            sum_sq_amt: 0.0,
            sum_sq_trn: 0.0,
            count: 0,
            first: None,
            amt_varies: false,
            trn_varies: false,
        }
    }

    pub fn push(&mut self, pair: LogPair) {
        let d_amt = self.mean.amt - pair.log_amt;
        let d_trn = self.mean.trn - pair.log_trn;
        self.sum_sq_amt += d_amt * d_amt;
        self.sum_sq_trn += d_trn * d_trn;
        self.count += 1;

        match self.first {
            None => self.first = Some(pair),
            Some(first) => {
                self.amt_varies |= pair.log_amt != first.log_amt;
                self.trn_varies |= pair.log_trn != first.log_trn;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Sample standard deviation per quantity (Bessel's correction).
    /// Exactly zero for a quantity with a single distinct value.
    pub fn finish(&self, brand: &BrandId) -> Result<StatsPair, PipelineError> {
        match self.count {
            0 => Err(PipelineError::EmptyPartition {
                brand_id: brand.clone(),
            }),
            1 => Err(PipelineError::InsufficientData {
                brand_id: brand.clone(),
                count: 1,
            }),
            n => {
                let denom = (n - 1) as f64;
                let spread = |varies: bool, sum_sq: f64| {
                    if varies {
                        (sum_sq / denom).sqrt()
                    } else {
                        0.0
                    }
                };
                Ok(StatsPair::new(
                    spread(self.amt_varies, self.sum_sq_amt),
                    spread(self.trn_varies, self.sum_sq_trn),
                ))
            }
        }
    }
}

// ============================================================================
// Z-SCORES
// ============================================================================

/// The mean and standard deviation of one brand, checked to be usable
/// as z-score denominators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScorer {
    mean: StatsPair,
    std_dev: StatsPair,
}

impl ZScorer {
    pub fn new(mean: StatsPair, std_dev: StatsPair) -> Result<Self, PipelineError> {
        for (quantity, value) in [
            (Quantity::Amount, std_dev.amt),
            (Quantity::Transactions, std_dev.trn),
        ] {
            if value == 0.0 || !value.is_finite() {
                return Err(PipelineError::DegenerateVariance {
                    quantity,
                    std_dev: value,
                });
            }
        }

        Ok(ZScorer { mean, std_dev })
    }

    pub fn score(&self, pair: LogPair) -> StatsPair {
        StatsPair::new(
            (pair.log_amt - self.mean.amt) / self.std_dev.amt,
            (pair.log_trn - self.mean.trn) / self.std_dev.trn,
        )
    }
}

// ============================================================================
// STREAMING PASSES
// ============================================================================

/// Pass 1: mean of the log-transformed quantities
pub fn compute_means<S: VisitorSource + ?Sized>(
    source: &S,
    brand: &BrandId,
) -> Result<StatsPair, PipelineError> {
    let mut acc = MeanAccumulator::new();

    source.scan(brand, &mut |visitor: Visitor| {
        acc.push(log_transform(&visitor)?);
        Ok(())
    })?;

    let mean = acc.finish(brand)?;
    log::debug!("Brand {}: mean over {} visitors = {}", brand, acc.count(), mean);
    Ok(mean)
}

/// Pass 2: sample standard deviation around `mean`
pub fn compute_std_devs<S: VisitorSource + ?Sized>(
    source: &S,
    brand: &BrandId,
    mean: &StatsPair,
) -> Result<StatsPair, PipelineError> {
    let mut acc = DispersionAccumulator::new(*mean);

    source.scan(brand, &mut |visitor: Visitor| {
        acc.push(log_transform(&visitor)?);
        Ok(())
    })?;

    let std_dev = acc.finish(brand)?;
    log::debug!("Brand {}: std-dev over {} visitors = {}", brand, acc.count(), std_dev);
    Ok(std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const EPS: f64 = 1e-9;

    fn pair(log_amt: f64, log_trn: f64) -> LogPair {
        LogPair { log_amt, log_trn }
    }

    fn acme() -> BrandId {
        BrandId::from("acme")
    }

    fn decades_store() -> MemoryStore {
        MemoryStore::with_visitors(vec![
            Visitor::new("v1", "acme", 10.0, 1),
            Visitor::new("v2", "acme", 100.0, 10),
            Visitor::new("v3", "acme", 1000.0, 100),
        ])
    }

    #[test]
    fn test_mean_of_decades() {
        let mean = compute_means(&decades_store(), &acme()).unwrap();

        assert!((mean.amt - 2.0).abs() < EPS);
        assert!((mean.trn - 1.0).abs() < EPS);
    }

    #[test]
    fn test_std_dev_of_decades() {
        let store = decades_store();
        let mean = compute_means(&store, &acme()).unwrap();
        let std_dev = compute_std_devs(&store, &acme(), &mean).unwrap();

        assert!((std_dev.amt - 1.0).abs() < EPS);
        assert!((std_dev.trn - 1.0).abs() < EPS);
    }

    #[test]
    fn test_empty_mean_is_error() {
        let err = MeanAccumulator::new().finish(&acme()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPartition { .. }));
    }

    #[test]
    fn test_dispersion_needs_two_values() {
        let mut acc = DispersionAccumulator::new(StatsPair::new(1.0, 1.0));
        assert!(matches!(
            acc.finish(&acme()).unwrap_err(),
            PipelineError::EmptyPartition { .. }
        ));

        acc.push(pair(1.0, 1.0));
        assert!(matches!(
            acc.finish(&acme()).unwrap_err(),
            PipelineError::InsufficientData { count: 1, .. }
        ));

        acc.push(pair(3.0, 1.0));
        let std_dev = acc.finish(&acme()).unwrap();
        // deviations from mean 1.0: 0 and 2 -> sum_sq 4 / (2 - 1)
        assert!((std_dev.amt - 2.0).abs() < EPS);
        assert_eq!(std_dev.trn, 0.0);
    }

    #[test]
    fn test_constant_amount_has_exactly_zero_spread() {
        let store = MemoryStore::with_visitors(vec![
            Visitor::new("v1", "acme", 47.0, 1),
            Visitor::new("v2", "acme", 47.0, 2),
            Visitor::new("v3", "acme", 47.0, 3),
        ]);
        let mean = compute_means(&store, &acme()).unwrap();
        let std_dev = compute_std_devs(&store, &acme(), &mean).unwrap();

        assert_eq!(std_dev.amt, 0.0);
        assert!(std_dev.trn > 0.0);
        assert!(matches!(
            ZScorer::new(mean, std_dev).unwrap_err(),
            PipelineError::DegenerateVariance { quantity: Quantity::Amount, .. }
        ));
    }

    #[test]
    fn test_zscorer_rejects_zero_std_dev() {
        let err = ZScorer::new(StatsPair::new(1.0, 1.0), StatsPair::new(0.5, 0.0)).unwrap_err();

        match err {
            PipelineError::DegenerateVariance { quantity, .. } => {
                assert_eq!(quantity, Quantity::Transactions)
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(ZScorer::new(StatsPair::default(), StatsPair::new(f64::NAN, 1.0)).is_err());
    }

    #[test]
    fn test_zscorer_scores() {
        let scorer = ZScorer::new(StatsPair::new(2.0, 1.0), StatsPair::new(1.0, 0.5)).unwrap();
        let z = scorer.score(pair(3.0, 0.0));

        assert!((z.amt - 1.0).abs() < EPS);
        assert!((z.trn + 2.0).abs() < EPS);
    }

    #[test]
    fn test_zero_transactions_abort_mean_pass() {
        let store = decades_store();
        store.insert(Visitor::new("v0", "acme", 50.0, 0));

        let err = compute_means(&store, &acme()).unwrap_err();
        assert!(matches!(err, PipelineError::TransformDomain { .. }));
    }
}
