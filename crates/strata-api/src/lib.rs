//! strata-api — management API for a strata storage node.
//!
//! Thin axum layer over the `LocationController`. Every response uses the
//! `{success, data, error}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v1/location_config` | All tenant locations on this node |
//! | PUT | `/v1/tenant/{tenant_id}/location_config` | Apply a location configuration |
//! | GET | `/v1/tenant/{tenant_id}/location_config` | Current realized location |
//! | POST | `/v1/tenant/{tenant_id}/heatmap_upload` | Publish the heatmap now |
//! | POST | `/v1/tenant/{tenant_id}/secondary/download` | Run one secondary download pass |
//! | POST | `/v1/tenant/{tenant_id}/checkpoint` | Freeze and upload every timeline |
//! | GET | `/v1/tenant/{tenant_id}/timeline` | List timelines |
//! | POST | `/v1/tenant/{tenant_id}/timeline` | Create a timeline |
//! | GET | `/v1/tenant/{tenant_id}/timeline/{timeline_id}` | Timeline detail |
//! | GET | `/v1/tenant/{tenant_id}/timeline/{timeline_id}/key/{key}` | Read one key |
//! | DELETE | `/v1/tenant/{tenant_id}/timeline/{timeline_id}/layer/{layer}` | Evict a layer |
//! | POST | `/v1/attach-hook` | Issue a generation from the node's authority |
//! | GET | `/v1/authority/{tenant_id}` | Latest issued generation |
//! | POST | `/v1/authority/{tenant_id}/confirm` | Classify a claimed generation |
//! | GET | `/v1/tenant/{tenant_id}/wal` | Timelines known to the log |
//! | PUT | `/v1/tenant/{tenant_id}/timeline/{timeline_id}/wal` | Create a timeline's log |
//! | POST | `/v1/tenant/{tenant_id}/timeline/{timeline_id}/wal` | Append a record |
//! | GET | `/v1/tenant/{tenant_id}/timeline/{timeline_id}/wal` | Read records after an lsn |
//!
//! The authority and log routes answer from the node's own collaborators.
//! On the control plane node those are the embedded authority and log; other
//! nodes forward to it.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use strata_tenant::LocationController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<LocationController>,
}

/// Build the management router.
pub fn build_router(controller: Arc<LocationController>) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/location_config", get(handlers::list_locations))
        .route(
            "/tenant/{tenant_id}/location_config",
            get(handlers::get_location).put(handlers::put_location),
        )
        .route("/tenant/{tenant_id}/heatmap_upload", post(handlers::upload_heatmap))
        .route(
            "/tenant/{tenant_id}/secondary/download",
            post(handlers::download_secondary),
        )
        .route("/tenant/{tenant_id}/checkpoint", post(handlers::checkpoint))
        .route(
            "/tenant/{tenant_id}/timeline",
            get(handlers::list_timelines).post(handlers::create_timeline),
        )
        .route(
            "/tenant/{tenant_id}/timeline/{timeline_id}",
            get(handlers::get_timeline),
        )
        .route(
            "/tenant/{tenant_id}/timeline/{timeline_id}/key/{key}",
            get(handlers::read_key),
        )
        .route(
            "/tenant/{tenant_id}/timeline/{timeline_id}/layer/{layer}",
            delete(handlers::evict_layer),
        )
        .route("/tenant/{tenant_id}/wal", get(handlers::log_timelines))
        .route(
            "/tenant/{tenant_id}/timeline/{timeline_id}/wal",
            get(handlers::read_log)
                .put(handlers::ensure_log)
                .post(handlers::append_log),
        )
        .route("/attach-hook", post(handlers::attach_hook))
        .route("/authority/{tenant_id}", get(handlers::latest_generation))
        .route(
            "/authority/{tenant_id}/confirm",
            post(handlers::confirm_generation),
        )
        .with_state(api_state);

    Router::new().nest("/v1", api_routes)
}
