// 👤 Visitor Model - the projection the z-score pipeline reads and writes
//
// A visitor is an individual, unique customer of a brand. The store holds
// more data per visitor; the pipeline only needs the id, the brand and the
// two summary figures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition key: statistics are computed independently per brand
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(pub String);

/// Stable, unique visitor identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(pub String);

impl BrandId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl VisitorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fresh random id for visitors imported without one
    pub fn generate() -> Self {
        VisitorId(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&str> for BrandId {
    fn from(s: &str) -> Self {
        BrandId(s.to_string())
    }
}

impl From<String> for BrandId {
    fn from(s: String) -> Self {
        BrandId(s)
    }
}

impl From<&str> for VisitorId {
    fn from(s: &str) -> Self {
        VisitorId(s.to_string())
    }
}

impl From<String> for VisitorId {
    fn from(s: String) -> Self {
        VisitorId(s)
    }
}

impl fmt::Display for BrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// The two figures we normalize. There is more in a visitor's summaries,
/// these are the only ones the pipeline touches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summaries {
    /// Total amount spent
    pub amt: f64,

    /// Number of transactions
    pub trn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visitor {
    pub id: VisitorId,
    pub brand_id: BrandId,
    pub summaries: Summaries,
}

impl Visitor {
    pub fn new(id: &str, brand_id: &str, amt: f64, trn: u32) -> Self {
        Visitor {
            id: VisitorId::from(id),
            brand_id: BrandId::from(brand_id),
            summaries: Summaries { amt, trn },
        }
    }

    /// Does this visitor pass the pipeline's query filter (`amt > 0`)?
    pub fn has_positive_amount(&self) -> bool {
        self.summaries.amt > 0.0
    }
}

/// Named `{amt, trn}` pair, used for means, standard deviations and z-scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsPair {
    pub amt: f64,
    pub trn: f64,
}

impl StatsPair {
    pub fn new(amt: f64, trn: f64) -> Self {
        StatsPair { amt, trn }
    }
}

impl fmt::Display for StatsPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{amt: {:.6}, trn: {:.6}}}", self.amt, self.trn)
    }
}

/// Log-transformed `(amt, trn)` of a single visitor. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogPair {
    pub log_amt: f64,
    pub log_trn: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_pair_serializes_as_amt_trn() {
        let pair = StatsPair::new(-1.0, 0.5);
        let json = serde_json::to_value(pair).unwrap();

        assert_eq!(json, serde_json::json!({"amt": -1.0, "trn": 0.5}));
    }

    #[test]
    fn test_ids_are_transparent() {
        let visitor = Visitor::new("v-1", "acme", 12.5, 3);
        let json = serde_json::to_value(&visitor).unwrap();

        assert_eq!(json["id"], "v-1");
        assert_eq!(json["brand_id"], "acme");
        assert_eq!(json["summaries"]["trn"], 3);
    }

    #[test]
    fn test_positive_amount_filter() {
        assert!(Visitor::new("a", "b", 0.01, 1).has_positive_amount());
        assert!(!Visitor::new("a", "b", 0.0, 1).has_positive_amount());
        assert!(!Visitor::new("a", "b", -5.0, 1).has_positive_amount());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(VisitorId::generate(), VisitorId::generate());
    }
}
