//! strata-state — durable state for a strata node.
//!
//! Backed by [redb](https://docs.rs/redb). Holds two kinds of record:
//!
//! - **Location records**: the last successfully realized `LocationConf`
//!   per (node, tenant), read synchronously at startup so a restarted node
//!   never has to infer its state from what happens to be on disk.
//! - **Generation records**: the per-tenant counter of the embedded
//!   generation authority plus the node each generation was issued to.
//!
//! Values are JSON-serialized into `&[u8]` columns. The `StateStore` is
//! `Clone + Send + Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
