//! strata-migration — the Live Migration Orchestrator.
//!
//! Moves write authority for a tenant from a source node to a destination
//! node without downtime. Nodes are only ever driven through their
//! configuration interface and the generation authority; the orchestrator
//! keeps no state that cannot be rebuilt from the nodes' current
//! configurations, so a crashed migration is resumed by running it again.

pub mod error;
pub mod migration;
pub mod node;
pub mod plan;

pub use error::{MigrationError, MigrationResult};
pub use migration::{Migration, MigrationConfig};
pub use node::LocationNode;
pub use plan::{MigrationStep, Observed, next_step};
