//! Read-mostly HTTP surface over the engine actor.
//!
//! The only writes are the permissionless evacuation calls: activation,
//! draining the queue and submitting claims.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollup_core::{
    BlockCounters, BlockPhase, CommitBlockInfo, Hash32, RequestCounters, RequestKind,
};
use rollup_engine::{ActorError, EngineHandle, EvacuMode, RollupEngine, RollupError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::Metrics;

/// Seconds since the Unix epoch, as seen by this node.
pub type Clock = fn() -> u64;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub metrics: Option<Metrics>,
    pub label: String,
    pub start_instant: Instant,
    pub clock: Clock,
}

impl AppState {
    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.start_instant.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u64 },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] ActorError),
    #[error("metrics disabled")]
    MetricsDisabled,
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::MetricsDisabled => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(ActorError::Engine(_)) => StatusCode::CONFLICT,
            Self::Engine(ActorError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(ActorError::Persist(_)) | Self::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::MetricsDisabled => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Engine(err) => err.code(),
            Self::Metrics(_) => "metrics_failed",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub mode: EvacuMode,
    pub blocks: BlockCounters,
    pub requests: RequestCounters,
    pub evacuation_deadline: Option<u64>,
    pub can_activate_evacuation: bool,
}

impl EngineSnapshot {
    pub fn of(engine: &RollupEngine, now: u64) -> Self {
        let state = engine.state();
        Self {
            mode: state.evacuation.mode,
            blocks: engine.block_counters(),
            requests: engine.request_counters(),
            evacuation_deadline: engine.evacuation_deadline(),
            can_activate_evacuation: engine.can_activate_evacuation(now),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    service: ServiceInfo,
    label: String,
    uptime_ms: u64,
    #[serde(flatten)]
    engine: EngineSnapshot,
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct RequestView {
    id: u64,
    kind: RequestKind,
    commitment: String,
    enqueued_at: u64,
    expires_at: u64,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct BlockView {
    number: u64,
    phase: BlockPhase,
    requests_consumed: u64,
    pending_settlement_hash: String,
    commitment: String,
    state_root: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct EvacuatedPair {
    account_id: u32,
    token_id: u16,
}

#[derive(Debug, Serialize)]
struct EvacuationView {
    mode: EvacuMode,
    drain_target: u64,
    activated_at: Option<u64>,
    deadline: Option<u64>,
    can_activate: bool,
    evacuated: Vec<EvacuatedPair>,
}

impl EvacuationView {
    fn of(engine: &RollupEngine, now: u64) -> Self {
        let evacuation = &engine.state().evacuation;
        Self {
            mode: evacuation.mode,
            drain_target: evacuation.drain_target,
            activated_at: evacuation.activated_at,
            deadline: engine.evacuation_deadline(),
            can_activate: engine.can_activate_evacuation(now),
            evacuated: evacuation
                .evacuated
                .iter()
                .map(|&(account_id, token_id)| EvacuatedPair {
                    account_id,
                    token_id,
                })
                .collect(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .route("/status", get(status))
        .route("/requests/:id", get(request))
        .route("/blocks/:number", get(block))
        .route("/evacuation", get(evacuation))
        .route("/evacuation/activate", post(activate))
        .route("/evacuation/consume", post(consume))
        .route("/evacuation/claims", post(submit_claim))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "ok"
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.query(|_| ()).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn snapshot(state: &AppState) -> Result<EngineSnapshot, ApiError> {
    let now = (state.clock)();
    Ok(state
        .engine
        .query(move |engine| EngineSnapshot::of(engine, now))
        .await?)
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let engine = snapshot(&state).await?;
    Ok(Json(StatusResponse {
        service: ServiceInfo {
            name: "rollup-node",
            version: env!("CARGO_PKG_VERSION"),
        },
        label: state.label.clone(),
        uptime_ms: state.uptime_ms(),
        engine,
    }))
}

async fn request(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<RequestView>, ApiError> {
    let view = state
        .engine
        .query(move |engine| {
            let request = engine.l1_request(id)?;
            let counters = engine.request_counters();
            let status = if id < counters.executed {
                "executed"
            } else if id < counters.committed {
                "committed"
            } else {
                "queued"
            };
            Some(RequestView {
                id,
                kind: request.kind,
                commitment: request.commitment.to_string(),
                enqueued_at: request.enqueued_at,
                expires_at: request.expires_at(engine.config().expiration_window_secs),
                status,
            })
        })
        .await?;
    view.map(Json)
        .ok_or(ApiError::NotFound { what: "request", id })
}

async fn block(
    State(state): State<AppState>,
    Path(number): Path<u64>,
) -> Result<Json<BlockView>, ApiError> {
    let view = state
        .engine
        .query(move |engine| {
            let block = engine.stored_block(number)?;
            Some(BlockView {
                number,
                phase: engine.block_counters().phase_of(number)?,
                requests_consumed: block.requests_consumed,
                pending_settlement_hash: block.pending_settlement_hash.to_string(),
                commitment: block.commitment.to_string(),
                state_root: block.state_root.to_string(),
                timestamp: block.timestamp,
            })
        })
        .await?;
    view.map(Json).ok_or(ApiError::NotFound {
        what: "block",
        id: number,
    })
}

async fn evacuation(State(state): State<AppState>) -> Result<Json<EvacuationView>, ApiError> {
    let now = (state.clock)();
    let view = state
        .engine
        .query(move |engine| EvacuationView::of(engine, now))
        .await?;
    Ok(Json(view))
}

async fn activate(State(state): State<AppState>) -> Result<Json<EvacuationView>, ApiError> {
    let now = (state.clock)();
    state.engine.activate_evacuation(now).await?;
    evacuation(State(state)).await
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))
}

fn decode_hash(field: &str, value: &str) -> Result<Hash32, ApiError> {
    Hash32::from_hex(value).map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))
}

/// Hex-encoded request payloads, in queue order from the executed cursor.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub payloads: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ConsumeResponse {
    executed: u64,
}

async fn consume(
    State(state): State<AppState>,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let payloads = body
        .payloads
        .iter()
        .map(|p| decode_hex("payloads", p))
        .collect::<Result<Vec<_>, _>>()?;
    let executed = state
        .engine
        .mutate("consume_l1_requests", move |engine| {
            engine.consume_l1_requests(&payloads)
        })
        .await?;
    Ok(Json(ConsumeResponse { executed }))
}

/// Evacuation claim against the last executed block. Hashes and bytes are hex.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub last_executed: u64,
    pub number: u64,
    pub timestamp: u64,
    pub new_state_root: String,
    #[serde(default)]
    pub aux_root: Option<String>,
    pub public_data: String,
    pub proof: String,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    request_id: u64,
}

async fn submit_claim(
    State(state): State<AppState>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let claim = CommitBlockInfo {
        number: body.number,
        timestamp: body.timestamp,
        new_state_root: decode_hash("new_state_root", &body.new_state_root)?,
        aux_root: match &body.aux_root {
            Some(root) => decode_hash("aux_root", root)?,
            None => Hash32::ZERO,
        },
        public_data: decode_hex("public_data", &body.public_data)?,
    };
    let proof = decode_hex("proof", &body.proof)?;
    let now = (state.clock)();
    let last_executed = body.last_executed;
    let request_id = state
        .engine
        .mutate("evacuate", move |engine| {
            let last = engine.stored_block(last_executed).cloned().ok_or(
                RollupError::LastExecutedMismatch {
                    expected: engine.block_counters().executed,
                },
            )?;
            engine.evacuate(&last, &claim, &proof, now)
        })
        .await?;
    Ok(Json(ClaimResponse { request_id }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let metrics = state.metrics.as_ref().ok_or(ApiError::MetricsDisabled)?;
    let snapshot = snapshot(&state).await?;
    metrics.observe(&snapshot, state.uptime_ms());
    let body = metrics.render()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    )
        .into_response())
}
