//! Raw-block HTTP gateway.
//!
//! Serves decoded block payloads and exposes the classifier and migration
//! counters:
//! - GET /block/{address}
//! - POST /block?algorithm=<name>
//! - GET /v1/blocks/stats
//! - GET /metrics
//! - GET /health

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blocks::address::BlockAddress;
use crate::blocks::block::BlockError;
use crate::blocks::classifier::ClassifierSnapshot;
use crate::blocks::codec::Algorithm;
use crate::blocks::materializer::BlockMaterializer;
use crate::blocks::promotion::{Direction, MigrationOutcome};
use crate::config::Config;
use crate::metrics::ReadPath;
use crate::store::StoreError;

/// Application state shared across handlers.
pub struct AppState {
    pub materializer: Arc<BlockMaterializer>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

/// Build the axum router with all gateway routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/block/{address}", get(get_block))
        .route("/block", post(put_block))
        .route("/v1/blocks/stats", get(block_stats))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GetBlockParams {
    /// Overrides the attachment filename.
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutBlockParams {
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBlockResponse {
    pub address: String,
    pub algorithm: Algorithm,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub blocks: BlockStatsResponse,
}

#[derive(Debug, Serialize)]
pub struct BlockStatsResponse {
    pub classifier: ClassifierSnapshot,
    pub promotion_threshold: u32,
    pub hot_saturation: u32,
    pub reads: ReadStats,
    pub promotions_enqueued: u64,
    pub promotions_dropped: u64,
    pub migrations: Vec<MigrationStatsResponse>,
}

#[derive(Debug, Serialize)]
pub struct ReadStats {
    pub cold: u64,
    pub hot: u64,
    pub corrupt: u64,
}

#[derive(Debug, Serialize)]
pub struct MigrationStatsResponse {
    pub direction: Direction,
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub discarded: u64,
}

type ApiError = (StatusCode, String);

fn api_error(e: BlockError) -> ApiError {
    let status = match &e {
        BlockError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        BlockError::Store(StoreError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        BlockError::HashMismatch { .. } => StatusCode::CONFLICT,
        BlockError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        BlockError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<GetBlockParams>,
) -> Result<Response, ApiError> {
    let address: BlockAddress = address.parse().map_err(api_error)?;
    let block = state.materializer.get(&address).await.map_err(|e| {
        warn!(address = %address.short_hex(), error = %e, "Block get failed");
        api_error(e)
    })?;

    let name = params
        .filename
        .unwrap_or_else(|| format!("{address}.bin"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/vnd.ipld.raw"),
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        block.into_data(),
    )
        .into_response())
}

async fn put_block(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PutBlockParams>,
    body: Bytes,
) -> Result<Json<PutBlockResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let algorithm = match params.algorithm {
        Some(name) => name
            .parse::<Algorithm>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        None => state.config.compression.ingest_algorithm,
    };

    let stored = state
        .materializer
        .put(&body, algorithm)
        .await
        .map_err(api_error)?;

    info!(
        request_id,
        address = %stored.address.short_hex(),
        requested = %algorithm,
        algorithm = %stored.algorithm,
        size = body.len(),
        "Block stored"
    );

    Ok(Json(PutBlockResponse {
        address: stored.address.to_string(),
        algorithm: stored.algorithm,
        size: body.len(),
    }))
}

fn collect_stats(state: &AppState) -> BlockStatsResponse {
    let classifier = state.materializer.classifier();
    let metrics = state.materializer.metrics();
    let snapshot = classifier.snapshot();
    metrics.record_snapshot(snapshot);

    let migrations = [Direction::Promote, Direction::Demote]
        .into_iter()
        .map(|direction| MigrationStatsResponse {
            direction,
            migrated: metrics.migrations(direction, MigrationOutcome::Migrated),
            skipped: metrics.migrations(direction, MigrationOutcome::Skipped),
            failed: metrics.migrations(direction, MigrationOutcome::Failed),
            discarded: metrics.migrations(direction, MigrationOutcome::Discarded),
        })
        .collect();

    BlockStatsResponse {
        classifier: snapshot,
        promotion_threshold: classifier.promotion_threshold(),
        hot_saturation: classifier.hot_saturation(),
        reads: ReadStats {
            cold: metrics.reads(ReadPath::Cold),
            hot: metrics.reads(ReadPath::Hot),
            corrupt: metrics.reads(ReadPath::Corrupt),
        },
        promotions_enqueued: metrics.enqueued(),
        promotions_dropped: metrics.dropped(),
        migrations,
    }
}

async fn block_stats(State(state): State<Arc<AppState>>) -> Json<BlockStatsResponse> {
    Json(collect_stats(&state))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let metrics = state.materializer.metrics();
    metrics.record_snapshot(state.materializer.classifier().snapshot());
    let text = metrics
        .render()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        text,
    )
        .into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        blocks: collect_stats(&state),
    })
}
