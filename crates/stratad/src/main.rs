//! stratad — the strata storage node daemon.
//!
//! Assembles one storage node:
//! - Location state store (redb)
//! - Local-filesystem object store shared with the other nodes
//! - Generation authority and log: embedded on the control plane node,
//!   reached over HTTP on every other node
//! - Location controller, restored from its durable records
//! - Management API
//!
//! # Usage
//!
//! ```text
//! stratad run --config /etc/strata/strata.toml --node-id 2 --port 9899
//! stratad default-config > strata.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use strata_client::{ControlPlaneClient, HttpAuthority, HttpLogSource};
use strata_core::{ControlPlane, NodeConfig, NodeId};
use strata_generation::{GenerationAuthority, LocalAuthority};
use strata_remote::LocalFs;
use strata_state::StateStore;
use strata_tenant::{LocationController, LogSource, NodeContext, WalService};

#[derive(Parser)]
#[command(name = "stratad", about = "Strata storage node daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a storage node.
    Run {
        /// Node configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured node id.
        #[arg(long)]
        node_id: Option<u64>,

        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratad=debug,strata=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run {
            config,
            node_id,
            port,
        } => run(load_config(config.as_deref(), node_id, port)?).await,
        Command::DefaultConfig => {
            print!("{}", NodeConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(path: Option<&Path>, node_id: Option<u64>, port: Option<u16>) -> anyhow::Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(node_id) = node_id {
        config.node_id = NodeId(node_id);
    }
    if let Some(port) = port {
        config.listen_port = port;
    }
    Ok(config)
}

/// The generation authority and log this node talks to.
fn control_plane_services(
    config: &NodeConfig,
    state: &StateStore,
) -> (Arc<dyn GenerationAuthority>, Arc<dyn LogSource>) {
    match &config.control_plane {
        ControlPlane::Embedded => {
            info!("hosting generation authority and log");
            (
                Arc::new(LocalAuthority::new(state.clone())),
                Arc::new(WalService::new()),
            )
        }
        ControlPlane::Remote {
            address,
            timeout_ms,
        } => {
            info!(%address, "using remote control plane");
            let client = ControlPlaneClient::new(address.clone(), Duration::from_millis(*timeout_ms));
            (
                Arc::new(HttpAuthority::new(client.clone())),
                Arc::new(HttpLogSource::new(client)),
            )
        }
    }
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!(node_id = %config.node_id, "strata node starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("strata.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let remote = Arc::new(LocalFs::new(config.remote_storage.clone())?);
    info!(root = ?config.remote_storage, "object store opened");

    let (authority, log) = control_plane_services(&config, &state);

    let port = config.listen_port;
    let ctx = NodeContext::new(config, remote, authority, log);
    let controller = Arc::new(LocationController::new(ctx, state));

    // Locations are restored before the API accepts any command.
    controller.recover().await?;

    // ── Start API server ───────────────────────────────────────

    let router = strata_api::build_router(controller.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    controller.shutdown().await;

    info!("strata node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "node_id = 3\nlisten_port = 7000\ndownload_concurrency = 8\n").unwrap();

        let config = load_config(Some(path.as_path()), None, Some(7001)).unwrap();
        assert_eq!(config.node_id, NodeId(3));
        assert_eq!(config.listen_port, 7001);
        assert_eq!(config.download_concurrency, 8);

        let config = load_config(Some(path.as_path()), Some(9), None).unwrap();
        assert_eq!(config.node_id, NodeId(9));
        assert_eq!(config.listen_port, 7000);
    }

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(None, None, None).unwrap();
        assert_eq!(config.listen_port, NodeConfig::default().listen_port);
    }

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::try_parse_from(["stratad", "run", "--node-id", "2", "--port", "9899"]).unwrap();
        match cli.command {
            Command::Run { config, node_id, port } => {
                assert!(config.is_none());
                assert_eq!(node_id, Some(2));
                assert_eq!(port, Some(9899));
            }
            Command::DefaultConfig => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn remote_control_plane_fails_closed_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = NodeConfig {
            control_plane: ControlPlane::Remote {
                address,
                timeout_ms: 1_000,
            },
            ..NodeConfig::default()
        };
        let state = StateStore::open_in_memory().unwrap();
        let (authority, log) = control_plane_services(&config, &state);

        let tenant_id = strata_core::TenantId::from_bytes([1; 16]);
        let err = authority.issue_generation(tenant_id, NodeId(1)).await.unwrap_err();
        assert!(matches!(err, strata_generation::AuthorityError::Unavailable(_)), "{err}");
        let err = log.timelines(tenant_id).await.unwrap_err();
        assert!(matches!(err, strata_tenant::LocationError::LogUnavailable(_)), "{err}");
        // Nothing was issued locally.
        assert!(state.latest_generation(tenant_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn embedded_control_plane_issues_locally() {
        let state = StateStore::open_in_memory().unwrap();
        let (authority, _log) = control_plane_services(&NodeConfig::default(), &state);
        let tenant_id = strata_core::TenantId::from_bytes([2; 16]);
        let generation = authority.issue_generation(tenant_id, NodeId(1)).await.unwrap();
        assert_eq!(state.latest_generation(tenant_id).unwrap().unwrap().generation, generation);
    }
}
