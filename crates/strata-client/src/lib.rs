//! Client side of the control plane.
//!
//! One node of a cluster hosts the generation authority and the log. Every
//! other node reaches them through the management API of that node:
//! [`HttpAuthority`] implements `GenerationAuthority` and [`HttpLogSource`]
//! implements `LogSource`, so the location controller cannot tell them from
//! the embedded ones.
//!
//! Each call opens a fresh HTTP/1 connection and is bounded by the client
//! timeout. Failures surface as "unavailable" errors and callers fail closed.

mod authority;
mod error;
mod log;

pub use authority::HttpAuthority;
pub use error::{ClientError, ClientResult};
pub use log::HttpLogSource;

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Thin JSON client for the control plane node's management API.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    address: String,
    timeout: Duration,
}

impl ControlPlaneClient {
    /// `address` is `host:port` of the control plane node.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.call(Method::GET, path, None).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.call(Method::PUT, path, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = serde_json::to_vec(body).map_err(|e| ClientError::Request {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.call(Method::POST, path, Some(body)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ClientResult<T> {
        let exchange = self.exchange(method, path, body);
        let (status, bytes) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(address = %self.address, %path, "control plane request timed out");
                return Err(ClientError::Timeout {
                    path: path.to_string(),
                });
            }
        };
        decode(path, status, &bytes)
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ClientResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| ClientError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ClientError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "control plane connection closed");
            }
        });

        let request_error = |reason: String| ClientError::Request {
            path: path.to_string(),
            reason,
        };

        let mut builder = http::Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, &self.address)
            .header(header::USER_AGENT, concat!("stratad/", env!("CARGO_PKG_VERSION")));
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| request_error(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| request_error(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| request_error(e.to_string()))?
            .to_bytes();
        Ok((status, bytes))
    }
}

/// The management API's response wrapper, read leniently.
#[derive(serde::Deserialize)]
struct Envelope {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

fn decode<T: DeserializeOwned>(path: &str, status: StatusCode, bytes: &[u8]) -> ClientResult<T> {
    if !status.is_success() {
        let message = serde_json::from_slice::<Envelope>(bytes)
            .ok()
            .and_then(|envelope| envelope.error)
            .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned());
        return Err(ClientError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    let decode_error = |e: serde_json::Error| ClientError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    };
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(decode_error)?;
    serde_json::from_value(envelope.data).map_err(decode_error)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use strata_core::{NodeConfig, NodeId};
    use strata_generation::LocalAuthority;
    use strata_remote::InMemoryStore;
    use strata_state::StateStore;
    use strata_tenant::{LocationController, NodeContext, WalService};

    /// Serve a control plane node on an ephemeral port; returns its address.
    pub async fn spawn_control_plane() -> String {
        let store = StateStore::open_in_memory().unwrap();
        let config = NodeConfig {
            node_id: NodeId(100),
            ..NodeConfig::default()
        };
        let ctx = NodeContext::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalAuthority::new(store.clone())),
            Arc::new(WalService::new()),
        );
        let controller = Arc::new(LocationController::new(ctx, store));
        let app = strata_api::build_router(controller);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        address
    }

    /// An address nothing listens on.
    pub async fn closed_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        address
    }
}
