use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use canvas::{
    CanvasRuntime, ExecutionId, FlowRecord, InputSnapshot, SingleFlightGuard, TextEncodedImage,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    channel,
    logging::category_compute,
    matting,
    matting::{MattingEngine, ThresholdMatting},
    outputs,
};

#[derive(Clone, Debug)]
pub struct CanvasConfig {
    pub edit_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub flow_capacity: usize,
    pub max_channel_msg_bytes: usize,
    pub output_dir: PathBuf,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            edit_ttl_ms: canvas::DEFAULT_EDIT_TTL_MS,
            sweep_interval_ms: 60_000,
            flow_capacity: canvas::DEFAULT_FLOW_CAPACITY,
            max_channel_msg_bytes: 32 * 1024 * 1024,
            output_dir: PathBuf::from(".layerbridge/outputs"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runtime: CanvasRuntime,
    pub(crate) matting_engine: Option<Arc<dyn MattingEngine>>,
    pub(crate) matting_gate: Arc<SingleFlightGuard>,
    pub(crate) metrics: Arc<CanvasMetrics>,
    pub(crate) config: CanvasConfig,
}

impl AppState {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            runtime: CanvasRuntime::new(config.edit_ttl_ms, config.flow_capacity),
            matting_engine: Some(Arc::new(ThresholdMatting)),
            matting_gate: Arc::new(SingleFlightGuard::new()),
            metrics: Arc::new(CanvasMetrics::default()),
            config,
        }
    }

    pub fn with_matting_engine(mut self, engine: Option<Arc<dyn MattingEngine>>) -> Self {
        self.matting_engine = engine;
        self
    }

    pub fn matting_gate(&self) -> &SingleFlightGuard {
        &self.matting_gate
    }
}

pub(crate) struct CanvasMetrics {
    pub(crate) started_at: Instant,
    pub(crate) channel_messages_total: AtomicU64,
    pub(crate) channel_errors_total: AtomicU64,
    pub(crate) compute_runs_total: AtomicU64,
    pub(crate) compute_skips_total: AtomicU64,
    pub(crate) sweep_evictions_total: AtomicU64,
    pub(crate) matting_requests_total: AtomicU64,
    pub(crate) matting_busy_total: AtomicU64,
    pub(crate) matting_failures_total: AtomicU64,
}

impl Default for CanvasMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            channel_messages_total: AtomicU64::new(0),
            channel_errors_total: AtomicU64::new(0),
            compute_runs_total: AtomicU64::new(0),
            compute_skips_total: AtomicU64::new(0),
            sweep_evictions_total: AtomicU64::new(0),
            matting_requests_total: AtomicU64::new(0),
            matting_busy_total: AtomicU64::new(0),
            matting_failures_total: AtomicU64::new(0),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputDataResponse {
    pub success: bool,
    pub has_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InputSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClearInputDataResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CanvasPayload {
    pub image: Option<String>,
    pub mask: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CanvasDataResponse {
    pub success: bool,
    pub data: CanvasPayload,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ComputeRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub fit_on_add: bool,
    #[serde(default)]
    pub execution_id: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub success: bool,
    pub flow_id: String,
    pub served_from_cache: bool,
    pub image: String,
    pub mask: String,
}

#[derive(Clone, Debug, Serialize)]
struct FlowListResponse {
    flows: Vec<FlowRecord>,
}

pub fn build_canvas_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/canvas/channel", get(channel::channel_handler))
        .route("/v1/input-data/{node_id}", get(get_input_data_handler))
        .route(
            "/v1/clear-input-data/{node_id}",
            post(clear_input_data_handler),
        )
        .route("/v1/canvas-data/{node_id}", get(get_canvas_data_handler))
        .route("/v1/compute/{node_id}", post(compute_handler))
        .route("/v1/flows", get(list_flows_handler))
        .route("/v1/flows/{flow_id}", get(get_flow_handler))
        .route("/v1/matting", post(matting::matting_handler))
        .route("/v1/outputs/latest", get(outputs::latest_output_handler))
        .route(
            "/v1/outputs/since/{since_unix_ms}",
            get(outputs::outputs_since_handler),
        )
        .route("/v1/load-image", post(outputs::load_image_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        elapsed_ms = elapsed_ms,
        "http access"
    );
    response
}

async fn healthz_handler() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = format!(
        concat!(
            "lb_server_uptime_seconds {}\n",
            "lb_server_channel_messages_total {}\n",
            "lb_server_channel_errors_total {}\n",
            "lb_server_compute_runs_total {}\n",
            "lb_server_compute_skips_total {}\n",
            "lb_server_sweep_evictions_total {}\n",
            "lb_server_matting_requests_total {}\n",
            "lb_server_matting_busy_total {}\n",
            "lb_server_matting_failures_total {}\n"
        ),
        state.metrics.started_at.elapsed().as_secs(),
        state.metrics.channel_messages_total.load(Ordering::Relaxed),
        state.metrics.channel_errors_total.load(Ordering::Relaxed),
        state.metrics.compute_runs_total.load(Ordering::Relaxed),
        state.metrics.compute_skips_total.load(Ordering::Relaxed),
        state.metrics.sweep_evictions_total.load(Ordering::Relaxed),
        state.metrics.matting_requests_total.load(Ordering::Relaxed),
        state.metrics.matting_busy_total.load(Ordering::Relaxed),
        state.metrics.matting_failures_total.load(Ordering::Relaxed),
    );
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
}

async fn get_input_data_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Json<InputDataResponse> {
    let data = state.runtime.inputs.get(&node_id);
    Json(InputDataResponse {
        success: true,
        has_input: data.is_some(),
        data,
    })
}

async fn clear_input_data_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Json<ClearInputDataResponse> {
    let cleared = state.runtime.inputs.clear(&node_id);
    let message = if cleared {
        format!("input data cleared for node {node_id}")
    } else {
        format!("no input data to clear for node {node_id}")
    };
    Json(ClearInputDataResponse {
        success: true,
        message,
    })
}

async fn get_canvas_data_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<CanvasDataResponse>, (StatusCode, Json<ErrorResponse>)> {
    let (image, mask) = state.runtime.cache.read(&node_id);
    let mut payload = CanvasPayload::default();
    if let Some(image) = image {
        payload.image = Some(encode_for_wire(&image)?);
    }
    if let Some(mask) = mask {
        payload.mask = Some(encode_for_wire(&mask)?);
    }
    Ok(Json(CanvasDataResponse {
        success: true,
        data: payload,
    }))
}

async fn compute_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<ComputeRequest>,
) -> Result<Json<ComputeResponse>, (StatusCode, Json<ErrorResponse>)> {
    if node_id.trim().is_empty() {
        return Err(bad_request("node_id cannot be empty"));
    }

    let input = InputSnapshot {
        image: request.image.map(TextEncodedImage::from_string),
        mask: request.mask.map(TextEncodedImage::from_string),
        fit_on_add: request.fit_on_add,
    };
    let execution_id = request.execution_id.map(ExecutionId::new);

    let outcome = state.runtime.process(&node_id, input, execution_id);
    info!(
        "{} node {node_id} flow {} served_from_cache={}",
        category_compute(),
        outcome.flow_id,
        outcome.served_from_cache
    );
    if outcome.served_from_cache {
        state
            .metrics
            .compute_skips_total
            .fetch_add(1, Ordering::Relaxed);
    } else {
        state
            .metrics
            .compute_runs_total
            .fetch_add(1, Ordering::Relaxed);
    }

    Ok(Json(ComputeResponse {
        success: true,
        flow_id: outcome.flow_id.to_string(),
        served_from_cache: outcome.served_from_cache,
        image: encode_for_wire(&outcome.image)?,
        mask: encode_for_wire(&outcome.mask)?,
    }))
}

async fn list_flows_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut flows = state.runtime.flows.query_all();
    flows.sort_by(|lhs, rhs| rhs.unix_ms.cmp(&lhs.unix_ms));
    Json(FlowListResponse { flows })
}

async fn get_flow_handler(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<FlowRecord>, (StatusCode, Json<ErrorResponse>)> {
    let flow_id = Uuid::parse_str(&flow_id).map_err(|_| bad_request("invalid flow id"))?;
    let Some(record) = state.runtime.flows.query(flow_id) else {
        return Err(not_found("flow not found"));
    };
    Ok(Json(record))
}

fn encode_for_wire(buffer: &canvas::ImageBuffer) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    buffer
        .to_data_uri()
        .map(|text| text.as_str().to_string())
        .map_err(|err| internal_error(format!("failed to encode result image: {err}")))
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub(crate) fn not_found(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub(crate) fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}
