// Visitor Z-Score System - Web Server
// REST API with Axum: trigger z-score runs per brand and inspect results

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use visitor_zscore::{
    get_visitors_by_brand, list_brands, run_and_record, BrandId, Config, PipelineError, RunReport,
    ScoredVisitor, SqliteStore, ZscorePipeline,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Mutex<ZscorePipeline<SqliteStore>>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Failed run, with enough detail to reason about partial writes
#[derive(Serialize)]
struct RunFailure {
    kind: &'static str,
    writes_applied: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/brands - All brands with visitors
async fn get_brands(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = match state.pipeline.lock() {
        Ok(guard) => guard,
        Err(_) => return internal_error::<Vec<BrandId>>("state lock poisoned".to_string()),
    };

    match list_brands(pipeline.store().connection()) {
        Ok(brands) => (StatusCode::OK, Json(ApiResponse::ok(brands))).into_response(),
        Err(e) => {
            log::error!("Error listing brands: {}", e);
            internal_error::<Vec<BrandId>>(e.to_string())
        }
    }
}

/// GET /api/brands/:brand/visitors - Visitors of a brand with current z-scores
async fn get_brand_visitors(
    State(state): State<AppState>,
    Path(brand): Path<String>,
) -> impl IntoResponse {
    let pipeline = match state.pipeline.lock() {
        Ok(guard) => guard,
        Err(_) => return internal_error::<Vec<ScoredVisitor>>("state lock poisoned".to_string()),
    };

    match get_visitors_by_brand(pipeline.store().connection(), &BrandId::from(brand)) {
        Ok(visitors) => (StatusCode::OK, Json(ApiResponse::ok(visitors))).into_response(),
        Err(e) => {
            log::error!("Error getting visitors: {}", e);
            internal_error::<Vec<ScoredVisitor>>(e.to_string())
        }
    }
}

/// POST /api/brands/:brand/zscores - Recompute z-scores for a brand
///
/// The pipeline lock also serializes runs, so one brand is never updated twice at once.
async fn update_brand_zscores(
    State(state): State<AppState>,
    Path(brand): Path<String>,
) -> impl IntoResponse {
    let brand = BrandId::from(brand);

    let outcome = tokio::task::spawn_blocking(move || {
        let pipeline = state
            .pipeline
            .lock()
            .map_err(|_| "state lock poisoned".to_string())?;
        Ok::<_, String>(run_and_record(&pipeline, &brand, "api"))
    })
    .await;

    match outcome {
        Ok(Ok(Ok(report))) => (StatusCode::OK, Json(ApiResponse::ok(report))).into_response(),
        Ok(Ok(Err(e))) => {
            let status = match e {
                PipelineError::EmptyPartition { .. } => StatusCode::NOT_FOUND,
                PipelineError::PersistenceFailure { .. } | PipelineError::Source(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            let body = ApiResponse {
                success: false,
                data: Some(RunFailure {
                    kind: e.kind(),
                    writes_applied: e.writes_applied(),
                }),
                error: Some(e.to_string()),
            };
            (status, Json(body)).into_response()
        }
        Ok(Err(message)) => internal_error::<RunReport>(message),
        Err(e) => internal_error::<RunReport>(format!("z-score task failed: {}", e)),
    }
}

fn internal_error<T: Serialize>(message: String) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<T>::err(message)),
    )
        .into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🌐 Visitor Z-Score System - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::load().expect("Failed to load configuration");

    let store = SqliteStore::open(&config.database_path).expect("Failed to open database");
    println!("✓ Database opened: {:?}", config.database_path);

    // Create shared state
    let state = AppState {
        pipeline: Arc::new(Mutex::new(
            ZscorePipeline::new(store).with_partition_cache(config.cache_partition),
        )),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/brands", get(get_brands))
        .route("/brands/:brand/visitors", get(get_brand_visitors))
        .route("/brands/:brand/zscores", post(update_brand_zscores))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: POST /api/brands/<brand>/zscores");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
