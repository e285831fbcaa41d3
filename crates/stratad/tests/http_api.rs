//! Management API driven through the router, the way an orchestrator
//! would talk to a node.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::*;

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn attach_hook_then_location_config_round_trip() {
    let cluster = Cluster::new();
    cluster.create_timeline().await;
    let node = cluster.node(1);
    let router = strata_api::build_router(node.clone());
    let tenant = TENANT.to_string();

    let (status, body) = call(&router, "GET", "/v1/location_config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = call(
        &router,
        "POST",
        "/v1/attach-hook",
        Some(json!({ "tenant_id": tenant, "node_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["generation"], json!(1));

    let uri = format!("/v1/tenant/{tenant}/location_config");
    let conf = json!({ "mode": "AttachedSingle", "generation": 1, "tenant_conf": { "checkpoint_distance": "4" } });
    let (status, body) = call(&router, "PUT", &uri, Some(conf.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], json!(true));

    // Applying the same command again changes nothing.
    let (status, _) = call(&router, "PUT", &uri, Some(conf)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["health"]["status"], json!("active"));

    let (_, body) = call(&router, "GET", "/v1/location_config", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let lsn = cluster.write(5, "five").await;
    wait(&node, lsn).await;
    let (status, body) = call(
        &router,
        "GET",
        &format!("/v1/tenant/{tenant}/timeline/{TIMELINE}/key/5"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], json!("five"));

    let (status, _) = call(&router, "POST", &format!("/v1/tenant/{tenant}/checkpoint"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "POST", &format!("/v1/tenant/{tenant}/heatmap_upload"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["generation"], json!(1));

    let (status, body) = call(
        &router,
        "GET",
        &format!("/v1/tenant/{tenant}/timeline/{TIMELINE}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let layer = body["data"]["layers"][0]["name"].as_str().unwrap().to_string();

    let (status, body) = call(
        &router,
        "DELETE",
        &format!("/v1/tenant/{tenant}/timeline/{TIMELINE}/layer/{layer}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(true));

    node.shutdown().await;
}

#[tokio::test]
async fn fencing_and_validation_errors_map_to_statuses() {
    let cluster = Cluster::new();
    let node = cluster.node(1);
    let router = strata_api::build_router(node.clone());
    let tenant = TENANT.to_string();
    let uri = format!("/v1/tenant/{tenant}/location_config");

    // A generation issued to another node.
    let (status, _) = call(
        &router,
        "POST",
        "/v1/attach-hook",
        Some(json!({ "tenant_id": tenant, "node_id": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &router,
        "PUT",
        &uri,
        Some(json!({ "mode": "AttachedSingle", "generation": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    // Mode-specific fields are checked before anything else.
    let (status, _) = call(
        &router,
        "PUT",
        &uri,
        Some(json!({ "mode": "Secondary", "generation": 1, "secondary_conf": { "warm": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        "PUT",
        &uri,
        Some(json!({ "mode": "Secondary", "secondary_conf": { "warm": false }, "tenant_conf": { "heatmap_period": "soon" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&router, "POST", &format!("/v1/tenant/{tenant}/checkpoint"), None).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    node.shutdown().await;
}
