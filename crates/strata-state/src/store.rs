//! StateStore — redb-backed persistence for location records and
//! generation counters.
//!
//! Supports on-disk, in-memory (for testing) and caller-supplied redb
//! backends.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, StorageBackend};
use tracing::debug;

use strata_core::{Generation, NodeId, TenantId, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Self::open_with_backend(redb::backends::InMemoryBackend::new())
    }

    /// Open a state store over any redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("state store opened over custom backend");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
        txn.open_table(ISSUED).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Location records ───────────────────────────────────────────

    /// Insert or replace the location record for a (node, tenant) pair.
    pub fn put_location(&self, record: &LocationRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, mode = ?record.conf.mode, "location record stored");
        Ok(())
    }

    pub fn get_location(
        &self,
        node_id: NodeId,
        tenant_id: TenantId,
    ) -> StateResult<Option<LocationRecord>> {
        let key = location_key(node_id, tenant_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: LocationRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List every location record belonging to one node.
    pub fn list_locations_for_node(&self, node_id: NodeId) -> StateResult<Vec<LocationRecord>> {
        let prefix = format!("{node_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: LocationRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete a location record. Returns true if it existed.
    pub fn delete_location(&self, node_id: NodeId, tenant_id: TenantId) -> StateResult<bool> {
        let key = location_key(node_id, tenant_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "location record deleted");
        Ok(existed)
    }

    // ── Generations ────────────────────────────────────────────────

    /// Issue the next generation for a tenant to `node_id`.
    ///
    /// The read of the previous value and the write of the new one happen in
    /// one write transaction; redb serializes write transactions, so
    /// concurrent callers always receive distinct, increasing values.
    pub fn issue_generation(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
    ) -> StateResult<GenerationRecord> {
        let key = tenant_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
            let previous: Option<GenerationRecord> =
                match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            let generation = match previous {
                Some(r) => r
                    .generation
                    .next()
                    .ok_or(StateError::GenerationsExhausted(tenant_id))?,
                None => Generation::FIRST,
            };
            record = GenerationRecord {
                tenant_id,
                generation,
                node_id,
                issued_at: epoch_secs(),
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut issued = txn.open_table(ISSUED).map_err(map_err!(Table))?;
            let node = serde_json::to_vec(&node_id).map_err(map_err!(Serialize))?;
            issued
                .insert(issued_key(tenant_id, generation).as_str(), node.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%tenant_id, %node_id, generation = %record.generation, "generation issued");
        Ok(record)
    }

    /// The most recently issued generation for a tenant.
    pub fn latest_generation(&self, tenant_id: TenantId) -> StateResult<Option<GenerationRecord>> {
        let key = tenant_id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: GenerationRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// The node a specific generation was issued to, if it was ever issued.
    pub fn issued_to(
        &self,
        tenant_id: TenantId,
        generation: Generation,
    ) -> StateResult<Option<NodeId>> {
        let key = issued_key(tenant_id, generation);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ISSUED).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: NodeId =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{AttachmentMode, LocationConf};

    fn tenant(n: u8) -> TenantId {
        TenantId::from_bytes([n; 16])
    }

    fn record(node: u64, t: u8, conf: LocationConf) -> LocationRecord {
        LocationRecord {
            node_id: NodeId(node),
            tenant_id: tenant(t),
            conf,
            updated_at: 1000,
        }
    }

    // ── Location records ───────────────────────────────────────────

    #[test]
    fn location_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = record(1, 1, LocationConf::attached(AttachmentMode::Single, Generation::FIRST));

        store.put_location(&rec).unwrap();
        let retrieved = store.get_location(NodeId(1), tenant(1)).unwrap();

        assert_eq!(retrieved, Some(rec));
        assert!(store.get_location(NodeId(2), tenant(1)).unwrap().is_none());
    }

    #[test]
    fn location_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_location(&record(1, 1, LocationConf::secondary(false)))
            .unwrap();
        store
            .put_location(&record(1, 1, LocationConf::secondary(true)))
            .unwrap();

        let retrieved = store.get_location(NodeId(1), tenant(1)).unwrap().unwrap();
        assert_eq!(retrieved.conf, LocationConf::secondary(true));
        assert_eq!(store.list_locations_for_node(NodeId(1)).unwrap().len(), 1);
    }

    #[test]
    fn location_list_is_scoped_to_node() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_location(&record(1, 1, LocationConf::secondary(true))).unwrap();
        store.put_location(&record(1, 2, LocationConf::secondary(true))).unwrap();
        store.put_location(&record(12, 3, LocationConf::secondary(true))).unwrap();

        assert_eq!(store.list_locations_for_node(NodeId(1)).unwrap().len(), 2);
        assert_eq!(store.list_locations_for_node(NodeId(12)).unwrap().len(), 1);
        assert!(store.list_locations_for_node(NodeId(5)).unwrap().is_empty());
    }

    #[test]
    fn location_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_location(&record(1, 1, LocationConf::secondary(true))).unwrap();

        assert!(store.delete_location(NodeId(1), tenant(1)).unwrap());
        assert!(!store.delete_location(NodeId(1), tenant(1)).unwrap());
        assert!(store.get_location(NodeId(1), tenant(1)).unwrap().is_none());
    }

    // ── Generations ────────────────────────────────────────────────

    #[test]
    fn generations_start_at_one_and_increase() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.latest_generation(tenant(1)).unwrap().is_none());

        let first = store.issue_generation(tenant(1), NodeId(1)).unwrap();
        let second = store.issue_generation(tenant(1), NodeId(2)).unwrap();
        assert_eq!(first.generation, Generation::FIRST);
        assert_eq!(second.generation, Generation::new(2));

        let latest = store.latest_generation(tenant(1)).unwrap().unwrap();
        assert_eq!(latest.generation, Generation::new(2));
        assert_eq!(latest.node_id, NodeId(2));
    }

    #[test]
    fn exhausted_generation_counter_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        let last = GenerationRecord {
            tenant_id: tenant(1),
            generation: Generation::new(u32::MAX),
            node_id: NodeId(1),
            issued_at: 0,
        };
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(GENERATIONS).unwrap();
            let value = serde_json::to_vec(&last).unwrap();
            table
                .insert(tenant(1).to_string().as_str(), value.as_slice())
                .unwrap();
        }
        txn.commit().unwrap();

        let err = store.issue_generation(tenant(1), NodeId(2)).unwrap_err();
        assert!(matches!(err, StateError::GenerationsExhausted(t) if t == tenant(1)));
        let latest = store.latest_generation(tenant(1)).unwrap().unwrap();
        assert_eq!(latest.generation, Generation::new(u32::MAX));
        assert_eq!(latest.node_id, NodeId(1));
    }

    #[test]
    fn generations_are_per_tenant() {
        let store = StateStore::open_in_memory().unwrap();
        store.issue_generation(tenant(1), NodeId(1)).unwrap();
        store.issue_generation(tenant(1), NodeId(1)).unwrap();
        let other = store.issue_generation(tenant(2), NodeId(1)).unwrap();
        assert_eq!(other.generation, Generation::FIRST);
    }

    #[test]
    fn issued_to_remembers_every_generation() {
        let store = StateStore::open_in_memory().unwrap();
        store.issue_generation(tenant(1), NodeId(1)).unwrap();
        store.issue_generation(tenant(1), NodeId(2)).unwrap();

        assert_eq!(
            store.issued_to(tenant(1), Generation::FIRST).unwrap(),
            Some(NodeId(1))
        );
        assert_eq!(
            store.issued_to(tenant(1), Generation::new(2)).unwrap(),
            Some(NodeId(2))
        );
        assert_eq!(store.issued_to(tenant(1), Generation::new(3)).unwrap(), None);
    }

    #[test]
    fn concurrent_issuance_yields_distinct_values() {
        let store = StateStore::open_in_memory().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| store.issue_generation(tenant(9), NodeId(i)).unwrap().generation)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Generation> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 80);
        assert_eq!(all.last().copied(), Some(Generation::new(80)));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .put_location(&record(1, 1, LocationConf::attached(AttachmentMode::Multi, Generation::FIRST)))
                .unwrap();
            store.issue_generation(tenant(1), NodeId(1)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let rec = store.get_location(NodeId(1), tenant(1)).unwrap().unwrap();
        assert_eq!(rec.conf.mode.generation(), Some(Generation::FIRST));
        let next = store.issue_generation(tenant(1), NodeId(1)).unwrap();
        assert_eq!(next.generation, Generation::new(2));
    }
}
