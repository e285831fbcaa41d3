//! Nodes with a remote control plane: one node serves the generation
//! authority and the log over its management API, agent nodes draw
//! generations and records from it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use strata_client::{ControlPlaneClient, HttpAuthority, HttpLogSource};
use strata_core::{AttachmentMode, ControlPlane, Generation, Lsn, NodeId, TenantConf};
use strata_generation::{GenerationAuthority, Issued};
use strata_state::StateStore;
use strata_tenant::{LocationController, LocationError, LogSource, NodeContext};

/// Serve the cluster's authority and log from node 100; returns its address.
async fn serve_control_plane(cluster: &Cluster) -> String {
    let controller = cluster.node(100);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, strata_api::build_router(controller))
            .await
            .unwrap();
    });
    address
}

fn client(address: &str) -> ControlPlaneClient {
    ControlPlaneClient::new(address, Duration::from_secs(5))
}

/// A node that keeps its own location records but asks `address` for
/// generations and records.
fn agent(cluster: &Cluster, address: &str, node_id: u64) -> Arc<LocationController> {
    let config = strata_core::NodeConfig {
        control_plane: ControlPlane::Remote {
            address: address.to_string(),
            timeout_ms: 5_000,
        },
        ..node_config(node_id)
    };
    let ctx = NodeContext::new(
        config,
        cluster.remote.clone(),
        Arc::new(HttpAuthority::new(client(address))),
        Arc::new(HttpLogSource::new(client(address))),
    );
    Arc::new(LocationController::new(ctx, StateStore::open_in_memory().unwrap()))
}

#[tokio::test]
async fn agents_share_one_authority_and_log() {
    let cluster = Cluster::new();
    cluster.create_timeline().await;
    let address = serve_control_plane(&cluster).await;
    let a = agent(&cluster, &address, 1);
    let b = agent(&cluster, &address, 2);
    let writer = HttpLogSource::new(client(&address));

    attach(&a, AttachmentMode::Single).await;
    let mut last = Lsn::INVALID;
    for key in 0..20u64 {
        last = writer
            .append_record(TENANT, TIMELINE, key, Bytes::from(format!("row-{key}")))
            .await
            .unwrap();
    }
    wait(&a, last).await;
    assert_eq!(read(&a, 3).await.as_deref(), Some("row-3"));
    a.checkpoint(TENANT).await.unwrap();

    // B draws the next value from the same counter.
    attach(&b, AttachmentMode::Multi).await;
    assert_eq!(
        cluster.authority.latest(TENANT).await.unwrap(),
        Some(Issued {
            generation: Generation::new(2),
            node_id: NodeId(2),
        })
    );

    let lsn = writer
        .append_record(TENANT, TIMELINE, 100, Bytes::from_static(b"after-handover"))
        .await
        .unwrap();
    wait(&b, lsn).await;
    assert_eq!(read(&b, 100).await.as_deref(), Some("after-handover"));
    assert_eq!(read(&b, 3).await.as_deref(), Some("row-3"));
    b.checkpoint(TENANT).await.unwrap();

    // A still ingests but its generation is superseded.
    wait(&a, lsn).await;
    assert!(matches!(
        a.checkpoint(TENANT).await,
        Err(LocationError::FencingRejected { .. })
    ));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn agent_fails_closed_without_control_plane() {
    let cluster = Cluster::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let node = agent(&cluster, &address, 1);
    let err = node
        .attach_with_new_generation(TENANT, AttachmentMode::Single, TenantConf::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::AuthorityUnavailable(_)), "{err}");
    assert!(node.location(TENANT).await.is_none());
    assert_eq!(cluster.authority.latest(TENANT).await.unwrap(), None);
}
