// Visitor Z-Score System - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod stats;
pub mod store;
pub mod transform;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Event, ScoredVisitor, SqliteStore,
    load_csv, setup_database, insert_visitors, insert_event, get_events_for_entity,
    get_visitors_by_brand, get_visitor_zscore, list_brands, count_visitors,
};
pub use error::{PipelineError, Quantity};
pub use model::{BrandId, LogPair, StatsPair, Summaries, Visitor, VisitorId};
pub use pipeline::{PipelineStage, RunReport, ZscorePipeline, write_zscores};
pub use stats::{
    DispersionAccumulator, MeanAccumulator, ZScorer,
    compute_means, compute_std_devs,
};
pub use store::{CachedSource, MemoryStore, VisitorSource, ZscoreWriter};
pub use transform::log_transform;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the pipeline for `brand` and record the outcome in the audit trail.
///
/// The run result is returned even if writing the audit event fails; that
/// failure is only logged.
pub fn run_and_record(
    pipeline: &ZscorePipeline<SqliteStore>,
    brand: &BrandId,
    actor: &str,
) -> Result<RunReport, PipelineError> {
    let result = pipeline.run(brand);

    let event = match &result {
        Ok(report) => Event::new(
            "zscores_updated",
            "brand",
            brand.as_str(),
            serde_json::json!({
                "visitors_scored": report.visitors_scored,
                "mean": report.mean,
                "std_dev": report.std_dev,
            }),
            actor,
        ),
        Err(e) => Event::new(
            "zscores_failed",
            "brand",
            brand.as_str(),
            serde_json::json!({
                "kind": e.kind(),
                "error": e.to_string(),
                "writes_applied": e.writes_applied(),
            }),
            actor,
        ),
    };

    if let Err(e) = insert_event(pipeline.store().connection(), &event) {
        log::warn!("Failed to record {} event for brand {}: {}", event.event_type, brand, e);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_and_record_success() {
        let store = SqliteStore::open_in_memory().unwrap();
        insert_visitors(
            store.connection(),
            &[
                Visitor::new("v1", "acme", 10.0, 1),
                Visitor::new("v2", "acme", 100.0, 10),
                Visitor::new("v3", "acme", 1000.0, 100),
            ],
        )
        .unwrap();
        let pipeline = ZscorePipeline::new(store);
        let brand = BrandId::from("acme");

        let report = run_and_record(&pipeline, &brand, "test").unwrap();
        assert_eq!(report.visitors_scored, 3);

        let conn = pipeline.store().connection();
        let z = get_visitor_zscore(conn, &VisitorId::from("v1")).unwrap().unwrap();
        assert!((z.amt + 1.0).abs() < 1e-9);
        assert!((z.trn + 1.0).abs() < 1e-9);

        let events = get_events_for_entity(conn, "brand", "acme").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "zscores_updated");
        assert_eq!(events[0].data["visitors_scored"], 3);
    }

    #[test]
    fn test_run_and_record_failure() {
        let pipeline = ZscorePipeline::new(SqliteStore::open_in_memory().unwrap());

        let err = run_and_record(&pipeline, &BrandId::from("ghost"), "test").unwrap_err();
        assert_eq!(err.kind(), "empty_partition");

        let events =
            get_events_for_entity(pipeline.store().connection(), "brand", "ghost").unwrap();
        assert_eq!(events[0].event_type, "zscores_failed");
        assert_eq!(events[0].data["kind"], "empty_partition");
    }

    #[test]
    fn test_sqlite_pipeline_with_cache() {
        let store = SqliteStore::open_in_memory().unwrap();
        insert_visitors(
            store.connection(),
            &[
                Visitor::new("v1", "acme", 20.0, 2),
                Visitor::new("v2", "acme", 80.0, 3),
                Visitor::new("v3", "acme", 0.0, 9),
            ],
        )
        .unwrap();
        let pipeline = ZscorePipeline::new(store).with_partition_cache(true);

        let report = pipeline.run(&BrandId::from("acme")).unwrap();

        assert_eq!(report.visitors_scored, 2);
        let conn = pipeline.store().connection();
        assert!(get_visitor_zscore(conn, &VisitorId::from("v3")).unwrap().is_none());
    }
}
