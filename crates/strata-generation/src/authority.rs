//! Generation authority contract and the embedded implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use strata_core::{Generation, NodeId, TenantId};
use strata_state::StateStore;

use crate::error::{AuthorityError, AuthorityResult};

/// A generation together with the node it was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issued {
    pub generation: Generation,
    pub node_id: NodeId,
}

/// What the authority knows about a generation a node claims to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Issued to the asking node and still the latest.
    Current,
    /// Issued to the asking node, but a newer generation exists.
    Superseded { latest: Generation },
    /// Never issued, or issued to some other node.
    Foreign,
}

#[async_trait]
pub trait GenerationAuthority: Send + Sync + 'static {
    /// Issue a new generation for `tenant_id` to `node_id`.
    ///
    /// The result is strictly greater than every value previously issued
    /// for the tenant, no matter which node asked. Every call issues a new
    /// value; nothing is cached.
    async fn issue_generation(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
    ) -> AuthorityResult<Generation>;

    /// The latest issued generation for a tenant, if any.
    async fn latest(&self, tenant_id: TenantId) -> AuthorityResult<Option<Issued>>;

    /// Classify a generation claimed by `node_id`.
    async fn confirm(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
        generation: Generation,
    ) -> AuthorityResult<GenerationStatus>;

    /// True if `generation` is still the latest and belongs to `node_id`.
    async fn validate(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
        generation: Generation,
    ) -> AuthorityResult<bool> {
        Ok(self.confirm(tenant_id, node_id, generation).await? == GenerationStatus::Current)
    }
}

/// Embedded authority persisting its counters in a `StateStore`.
///
/// Issuance is a single redb write transaction, so concurrent requests for
/// one tenant from different nodes always get distinct increasing values.
#[derive(Clone)]
pub struct LocalAuthority {
    state: StateStore,
}

impl LocalAuthority {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

#[async_trait]
impl GenerationAuthority for LocalAuthority {
    async fn issue_generation(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
    ) -> AuthorityResult<Generation> {
        let state = self.state.clone();
        let record = tokio::task::spawn_blocking(move || state.issue_generation(tenant_id, node_id))
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))??;
        info!(%tenant_id, %node_id, generation = %record.generation, "issued generation");
        Ok(record.generation)
    }

    async fn latest(&self, tenant_id: TenantId) -> AuthorityResult<Option<Issued>> {
        Ok(self
            .state
            .latest_generation(tenant_id)?
            .map(|r| Issued {
                generation: r.generation,
                node_id: r.node_id,
            }))
    }

    async fn confirm(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
        generation: Generation,
    ) -> AuthorityResult<GenerationStatus> {
        if self.state.issued_to(tenant_id, generation)? != Some(node_id) {
            return Ok(GenerationStatus::Foreign);
        }
        let latest = self
            .state
            .latest_generation(tenant_id)?
            .map(|r| r.generation)
            .unwrap_or(generation);
        if latest == generation {
            Ok(GenerationStatus::Current)
        } else {
            Ok(GenerationStatus::Superseded { latest })
        }
    }
}
