// ❗ Pipeline Errors - every way a z-score run can abort
//
// All variants abort the current run. Nothing is retried here; retrying is
// the caller's job and applies to the whole brand, not to single visitors.

use crate::model::{BrandId, VisitorId};
use thiserror::Error;

/// Which of the two measured quantities a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Amount,
    Transactions,
}

impl Quantity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Amount => "amt",
            Quantity::Transactions => "trn",
        }
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No visitor with a positive amount exists for the brand
    #[error("empty partition: brand {brand_id} has no visitors with a positive amount")]
    EmptyPartition { brand_id: BrandId },

    /// Exactly one qualifying visitor, sample standard deviation undefined
    #[error("insufficient data for variance: brand {brand_id} has {count} qualifying visitor(s)")]
    InsufficientData { brand_id: BrandId, count: usize },

    /// Standard deviation of one quantity is zero (or not finite)
    #[error("degenerate variance: standard deviation of {quantity} is {std_dev}")]
    DegenerateVariance { quantity: Quantity, std_dev: f64 },

    /// log10 is undefined for this visitor's summaries
    #[error("transform domain error for visitor {visitor_id}: amt={amt}, trn={trn}")]
    TransformDomain {
        visitor_id: VisitorId,
        amt: f64,
        trn: u32,
    },

    /// A z-score write failed; `written` visitors were already updated
    #[error("failed to persist z-score for visitor {visitor_id} after {written} successful writes")]
    PersistenceFailure {
        visitor_id: VisitorId,
        written: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The visitor source itself failed (query, decode, connection)
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short stable name, used in logs and audit events
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyPartition { .. } => "empty_partition",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::DegenerateVariance { .. } => "degenerate_variance",
            PipelineError::TransformDomain { .. } => "transform_domain",
            PipelineError::PersistenceFailure { .. } => "persistence_failure",
            PipelineError::Source(_) => "source",
        }
    }

    /// Number of visitors already holding a new z-score when the run aborted
    pub fn writes_applied(&self) -> usize {
        match self {
            PipelineError::PersistenceFailure { written, .. } => *written,
            _ => 0,
        }
    }
}
