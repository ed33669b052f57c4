// 📐 Log Transform
//
// Amounts and transaction counts are right-skewed. Taking log10 first makes
// them look much more like a normal distribution, so z-scores mean something.
//
// Zero-count visitors are rejected, not skipped. Every pass goes through
// this one function, so the policy is the same for mean, std-dev and writes.

use crate::error::PipelineError;
use crate::model::{LogPair, Visitor};

/// `(log10(amt), log10(trn))` for one visitor
pub fn log_transform(visitor: &Visitor) -> Result<LogPair, PipelineError> {
    let amt = visitor.summaries.amt;
    let trn = visitor.summaries.trn;

    if !(amt > 0.0 && amt.is_finite()) || trn == 0 {
        return Err(PipelineError::TransformDomain {
            visitor_id: visitor.id.clone(),
            amt,
            trn,
        });
    }

    Ok(LogPair {
        log_amt: amt.log10(),
        log_trn: f64::from(trn).log10(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powers_of_ten() {
        let pair = log_transform(&Visitor::new("v", "b", 1000.0, 100)).unwrap();

        assert!((pair.log_amt - 3.0).abs() < 1e-12);
        assert!((pair.log_trn - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_transaction_is_zero() {
        let pair = log_transform(&Visitor::new("v", "b", 10.0, 1)).unwrap();
        assert_eq!(pair.log_trn, 0.0);
    }

    #[test]
    fn test_zero_transactions_rejected() {
        let err = log_transform(&Visitor::new("v-0", "b", 10.0, 0)).unwrap_err();

        match err {
            PipelineError::TransformDomain { visitor_id, trn, .. } => {
                assert_eq!(visitor_id.as_str(), "v-0");
                assert_eq!(trn, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        assert!(log_transform(&Visitor::new("v", "b", 0.0, 3)).is_err());
        assert!(log_transform(&Visitor::new("v", "b", f64::NAN, 3)).is_err());
        assert!(log_transform(&Visitor::new("v", "b", f64::INFINITY, 3)).is_err());
    }
}
