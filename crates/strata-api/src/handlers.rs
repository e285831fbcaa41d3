//! REST API handlers.
//!
//! Each handler parses its path ids, calls the `LocationController` and maps
//! `LocationError` onto an HTTP status.

use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use strata_core::{
    Generation, LocationConf, LocationConfigRequest, Lsn, NodeId, TenantId, TimelineId,
};
use strata_tenant::{LayerName, LocationError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

pub(crate) fn status_for(err: &LocationError) -> StatusCode {
    match err {
        LocationError::ConfigConflict(_) => StatusCode::BAD_REQUEST,
        LocationError::NotFound(_) => StatusCode::NOT_FOUND,
        LocationError::FencingRejected { .. } => StatusCode::CONFLICT,
        LocationError::NotAttached(_) | LocationError::NotSecondary(_) => {
            StatusCode::PRECONDITION_FAILED
        }
        LocationError::AuthorityUnavailable(_) | LocationError::LogUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LocationError::WaitLsnTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn location_error(err: LocationError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

fn respond<T: Serialize>(result: Result<T, LocationError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => location_error(e),
    }
}

fn parse<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse()
        .map_err(|_| error_response(&format!("invalid {what}: {raw}"), StatusCode::BAD_REQUEST).into_response())
}

macro_rules! parse_or_return {
    ($raw:expr, $what:literal) => {
        match parse($raw, $what) {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

// ── Locations ──────────────────────────────────────────────────

/// GET /v1/location_config
pub async fn list_locations(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.list_locations().await)
}

/// GET /v1/tenant/{tenant_id}/location_config
pub async fn get_location(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    match state.controller.location(tenant_id).await {
        Some(location) => ApiResponse::ok(location).into_response(),
        None => error_response("tenant not present on this node", StatusCode::NOT_FOUND)
            .into_response(),
    }
}

/// PUT /v1/tenant/{tenant_id}/location_config
pub async fn put_location(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<LocationConfigRequest>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let conf = match LocationConf::try_from(req) {
        Ok(conf) => conf,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };
    info!(%tenant_id, mode = ?conf.mode.name(), "location config requested");
    respond(state.controller.configure(tenant_id, conf).await)
}

// ── Operator actions ───────────────────────────────────────────

/// POST /v1/tenant/{tenant_id}/heatmap_upload
///
/// `data` is null when the location is stale and publishes nothing.
pub async fn upload_heatmap(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    respond(state.controller.upload_heatmap(tenant_id).await)
}

/// POST /v1/tenant/{tenant_id}/secondary/download
pub async fn download_secondary(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    respond(state.controller.download_secondary(tenant_id).await)
}

/// POST /v1/tenant/{tenant_id}/checkpoint
pub async fn checkpoint(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    respond(
        state
            .controller
            .checkpoint(tenant_id)
            .await
            .map(|()| "checkpointed"),
    )
}

// ── Timelines ──────────────────────────────────────────────────

/// Create timeline request body.
#[derive(Deserialize)]
pub struct CreateTimelineRequest {
    pub timeline_id: TimelineId,
}

/// GET /v1/tenant/{tenant_id}/timeline
pub async fn list_timelines(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    respond(state.controller.list_timelines(tenant_id).await)
}

/// POST /v1/tenant/{tenant_id}/timeline
pub async fn create_timeline(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<CreateTimelineRequest>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    match state.controller.create_timeline(tenant_id, req.timeline_id).await {
        Ok(detail) => (StatusCode::CREATED, ApiResponse::ok(detail)).into_response(),
        Err(e) => location_error(e),
    }
}

/// GET /v1/tenant/{tenant_id}/timeline/{timeline_id}
pub async fn get_timeline(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id)): Path<(String, String)>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    respond(state.controller.timeline_detail(tenant_id, timeline_id).await)
}

/// Value of a key as seen by this node.
#[derive(Serialize)]
pub struct KeyValue {
    pub key: u64,
    pub value: Option<String>,
}

/// GET /v1/tenant/{tenant_id}/timeline/{timeline_id}/key/{key}
pub async fn read_key(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id, key)): Path<(String, String, String)>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    let key: u64 = parse_or_return!(&key, "key");
    respond(
        state
            .controller
            .read(tenant_id, timeline_id, key)
            .await
            .map(|value| KeyValue {
                key,
                value: value.map(|v| String::from_utf8_lossy(&v).into_owned()),
            }),
    )
}

/// DELETE /v1/tenant/{tenant_id}/timeline/{timeline_id}/layer/{layer}
///
/// `data` is false when the layer is not resident or not yet uploaded.
pub async fn evict_layer(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id, layer)): Path<(String, String, String)>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    let Some(layer) = LayerName::parse(&layer) else {
        return error_response(&format!("invalid layer name: {layer}"), StatusCode::BAD_REQUEST)
            .into_response();
    };
    respond(
        state
            .controller
            .evict_layer(tenant_id, timeline_id, &layer)
            .await,
    )
}

// ── Generations ────────────────────────────────────────────────

/// Attach hook request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttachHookRequest {
    pub tenant_id: TenantId,
    pub node_id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachHookResponse {
    pub generation: Generation,
}

/// POST /v1/attach-hook
///
/// Issues the next generation of a tenant to a node. The caller then sends
/// the matching location configuration to that node.
pub async fn attach_hook(
    State(state): State<ApiState>,
    Json(req): Json<AttachHookRequest>,
) -> Response {
    let authority = &state.controller.context().authority;
    match authority.issue_generation(req.tenant_id, req.node_id).await {
        Ok(generation) => {
            info!(tenant_id = %req.tenant_id, node_id = %req.node_id, %generation, "issued generation");
            ApiResponse::ok(AttachHookResponse { generation }).into_response()
        }
        Err(e) => location_error(e.into()),
    }
}

/// Generation confirmation request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub node_id: NodeId,
    pub generation: Generation,
}

/// GET /v1/authority/{tenant_id}
///
/// `data` is null when no generation was ever issued for the tenant.
pub async fn latest_generation(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let authority = &state.controller.context().authority;
    respond(authority.latest(tenant_id).await.map_err(LocationError::from))
}

/// POST /v1/authority/{tenant_id}/confirm
pub async fn confirm_generation(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let authority = &state.controller.context().authority;
    respond(
        authority
            .confirm(tenant_id, req.node_id, req.generation)
            .await
            .map_err(LocationError::from),
    )
}

// ── Log ────────────────────────────────────────────────────────

const DEFAULT_LOG_READ_LIMIT: usize = 1024;

/// Log append request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppendRequest {
    pub key: u64,
    pub value: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    pub lsn: Lsn,
}

/// Query string of a log read.
#[derive(Debug, Deserialize)]
pub struct ReadLogQuery {
    #[serde(default)]
    pub after: u64,
    pub limit: Option<usize>,
}

/// GET /v1/tenant/{tenant_id}/wal
pub async fn log_timelines(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    respond(state.controller.context().log.timelines(tenant_id).await)
}

/// PUT /v1/tenant/{tenant_id}/timeline/{timeline_id}/wal
pub async fn ensure_log(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id)): Path<(String, String)>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    respond(
        state
            .controller
            .context()
            .log
            .ensure_timeline(tenant_id, timeline_id)
            .await
            .map(|()| "ensured"),
    )
}

/// POST /v1/tenant/{tenant_id}/timeline/{timeline_id}/wal
pub async fn append_log(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id)): Path<(String, String)>,
    Json(req): Json<AppendRequest>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    respond(
        state
            .controller
            .context()
            .log
            .append_record(tenant_id, timeline_id, req.key, req.value.into())
            .await
            .map(|lsn| AppendResponse { lsn }),
    )
}

/// GET /v1/tenant/{tenant_id}/timeline/{timeline_id}/wal?after=&limit=
///
/// Records with an lsn above `after`, oldest first.
pub async fn read_log(
    State(state): State<ApiState>,
    Path((tenant_id, timeline_id)): Path<(String, String)>,
    Query(query): Query<ReadLogQuery>,
) -> Response {
    let tenant_id: TenantId = parse_or_return!(&tenant_id, "tenant id");
    let timeline_id: TimelineId = parse_or_return!(&timeline_id, "timeline id");
    let limit = query.limit.unwrap_or(DEFAULT_LOG_READ_LIMIT);
    respond(
        state
            .controller
            .context()
            .log
            .read_after(tenant_id, timeline_id, Lsn(query.after), limit)
            .await,
    )
}
