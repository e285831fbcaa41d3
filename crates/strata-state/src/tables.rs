//! redb table definitions for the strata state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Location records keyed by `{node_id}/{tenant_id}`.
pub const LOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("locations");

/// Latest generation per tenant keyed by `{tenant_id}`.
pub const GENERATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("generations");

/// Every issued generation keyed by `{tenant_id}:{generation:08x}`.
pub const ISSUED: TableDefinition<&str, &[u8]> = TableDefinition::new("issued_generations");
