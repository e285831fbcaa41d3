//! Immutable layer files.
//!
//! A layer holds every record of one timeline between two lsns (both
//! inclusive). Its name encodes that range as `{start:016X}-{end:016X}`, so
//! names sort in lsn order. The encoded form is what gets uploaded.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use strata_core::{Lsn, TimelineId};

use crate::error::{LocationError, LocationResult};
use crate::wal::WalRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerName(String);

impl LayerName {
    pub fn new(start: Lsn, end: Lsn) -> Self {
        Self(format!("{:016X}-{:016X}", start.0, end.0))
    }

    /// Parse and check a layer name read from somewhere untrusted.
    pub fn parse(name: &str) -> Option<Self> {
        let (start, end) = name.split_once('-')?;
        if start.len() != 16 || end.len() != 16 {
            return None;
        }
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        (start <= end).then(|| Self::new(Lsn(start), Lsn(end)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last lsn contained in the layer.
    pub fn end_lsn(&self) -> Lsn {
        self.0
            .split_once('-')
            .and_then(|(_, end)| u64::from_str_radix(end, 16).ok())
            .map(Lsn)
            .unwrap_or(Lsn::INVALID)
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFile {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub records: Vec<WalRecord>,
}

impl LayerFile {
    /// Build a layer from records in lsn order. `None` when empty.
    pub fn from_records(records: Vec<WalRecord>) -> Option<Self> {
        let start_lsn = records.first()?.lsn;
        let end_lsn = records.last()?.lsn;
        Some(Self {
            start_lsn,
            end_lsn,
            records,
        })
    }

    pub fn name(&self) -> LayerName {
        LayerName::new(self.start_lsn, self.end_lsn)
    }

    /// Newest value written to `key` within this layer.
    pub fn get(&self, key: u64) -> Option<&[u8]> {
        self.records
            .iter()
            .rev()
            .find(|r| r.key == key)
            .map(|r| r.value.as_slice())
    }

    pub fn encode(&self) -> LocationResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| LocationError::Corrupt(format!("encode layer {}: {e}", self.name())))
    }

    pub fn decode(bytes: &[u8]) -> LocationResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LocationError::Corrupt(format!("decode layer: {e}")))
    }
}

/// Layer files held on local disk, per timeline.
pub type LocalLayers = HashMap<TimelineId, BTreeMap<LayerName, Arc<LayerFile>>>;

/// Local layer residency operations for one timeline.
#[async_trait]
pub trait LayerStore: Send + Sync {
    /// Names of layers currently resident locally.
    async fn list_local(&self) -> Vec<LayerName>;

    /// Drop the local copy of a layer. Only layers already in the object
    /// store may be evicted; returns whether anything was dropped.
    async fn evict(&self, name: &LayerName) -> LocationResult<bool>;

    /// Read a layer's encoded body from the object store.
    async fn fetch(&self, name: &LayerName) -> LocationResult<Bytes>;
}
