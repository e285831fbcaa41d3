//! Generation authority hosted by the control plane node.

use async_trait::async_trait;
use tracing::warn;

use strata_api::handlers::{AttachHookRequest, AttachHookResponse, ConfirmRequest};
use strata_core::{Generation, NodeId, TenantId};
use strata_generation::{AuthorityError, AuthorityResult, GenerationAuthority, GenerationStatus, Issued};

use crate::{ClientError, ControlPlaneClient};

/// `GenerationAuthority` answered by a remote node's `/v1/attach-hook` and
/// `/v1/authority` routes.
///
/// Any failure, including an error status from the remote, is reported as
/// `Unavailable`: a node that cannot confirm its generation must not act on
/// it.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: ControlPlaneClient,
}

impl HttpAuthority {
    pub fn new(client: ControlPlaneClient) -> Self {
        Self { client }
    }
}

fn unavailable(e: ClientError) -> AuthorityError {
    warn!(error = %e, "generation authority call failed");
    AuthorityError::Unavailable(e.to_string())
}

#[async_trait]
impl GenerationAuthority for HttpAuthority {
    async fn issue_generation(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
    ) -> AuthorityResult<Generation> {
        let req = AttachHookRequest { tenant_id, node_id };
        let resp: AttachHookResponse = self
            .client
            .post("/v1/attach-hook", &req)
            .await
            .map_err(unavailable)?;
        Ok(resp.generation)
    }

    async fn latest(&self, tenant_id: TenantId) -> AuthorityResult<Option<Issued>> {
        self.client
            .get(&format!("/v1/authority/{tenant_id}"))
            .await
            .map_err(unavailable)
    }

    async fn confirm(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
        generation: Generation,
    ) -> AuthorityResult<GenerationStatus> {
        let req = ConfirmRequest {
            node_id,
            generation,
        };
        self.client
            .post(&format!("/v1/authority/{tenant_id}/confirm"), &req)
            .await
            .map_err(unavailable)
    }
}
