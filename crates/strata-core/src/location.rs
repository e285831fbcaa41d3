//! Location configuration — the desired state of one (node, tenant) pair.
//!
//! [`LocationMode`] is a sum type with exactly one variant per mode and the
//! mode's required fields, so an attached mode without a generation cannot be
//! represented. [`LocationConfigRequest`] is the loosely-typed wire shape; it
//! is converted at the boundary and rejected with
//! [`CoreError::ConfigConflict`] when its fields do not match its mode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::Generation;

/// How an attached node relates to other attached nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentMode {
    /// The sole expected attached node.
    Single,
    /// Current generation, but another attached node may still exist.
    Multi,
    /// Possibly superseded; keeps ingesting but avoids remote writes.
    Stale,
}

impl AttachmentMode {
    /// Whether layers, indexes and heatmaps may be written to the object store.
    pub fn remote_writes(self) -> bool {
        !matches!(self, AttachmentMode::Stale)
    }

    /// Whether this mode claims to hold the latest generation.
    pub fn claims_latest(self) -> bool {
        !matches!(self, AttachmentMode::Stale)
    }
}

/// Secondary-mode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecondaryConf {
    /// Prefetch layers from the heatmap in the background.
    pub warm: bool,
}

/// The mode a tenant location is in, with mode-specific required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum LocationMode {
    Detached,
    AttachedSingle { generation: Generation },
    AttachedMulti { generation: Generation },
    AttachedStale { generation: Generation },
    Secondary { warm: bool },
}

impl LocationMode {
    pub fn attached(mode: AttachmentMode, generation: Generation) -> Self {
        match mode {
            AttachmentMode::Single => LocationMode::AttachedSingle { generation },
            AttachmentMode::Multi => LocationMode::AttachedMulti { generation },
            AttachmentMode::Stale => LocationMode::AttachedStale { generation },
        }
    }

    /// The attachment mode and generation, if this is an attached variant.
    pub fn attachment(&self) -> Option<(AttachmentMode, Generation)> {
        match *self {
            LocationMode::AttachedSingle { generation } => Some((AttachmentMode::Single, generation)),
            LocationMode::AttachedMulti { generation } => Some((AttachmentMode::Multi, generation)),
            LocationMode::AttachedStale { generation } => Some((AttachmentMode::Stale, generation)),
            LocationMode::Detached | LocationMode::Secondary { .. } => None,
        }
    }

    pub fn generation(&self) -> Option<Generation> {
        self.attachment().map(|(_, g)| g)
    }

    pub fn secondary_conf(&self) -> Option<SecondaryConf> {
        match *self {
            LocationMode::Secondary { warm } => Some(SecondaryConf { warm }),
            _ => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment().is_some()
    }

    pub fn name(&self) -> LocationModeName {
        match self {
            LocationMode::Detached => LocationModeName::Detached,
            LocationMode::AttachedSingle { .. } => LocationModeName::AttachedSingle,
            LocationMode::AttachedMulti { .. } => LocationModeName::AttachedMulti,
            LocationMode::AttachedStale { .. } => LocationModeName::AttachedStale,
            LocationMode::Secondary { .. } => LocationModeName::Secondary,
        }
    }
}

/// Tenant-level tuning overrides, passed through the state machine untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantConf(pub BTreeMap<String, String>);

impl TenantConf {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

/// Desired state for one (node, tenant) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConf {
    #[serde(flatten)]
    pub mode: LocationMode,
    #[serde(default)]
    pub tenant_conf: TenantConf,
}

impl LocationConf {
    pub fn new(mode: LocationMode) -> Self {
        Self {
            mode,
            tenant_conf: TenantConf::default(),
        }
    }

    pub fn detached() -> Self {
        Self::new(LocationMode::Detached)
    }

    pub fn secondary(warm: bool) -> Self {
        Self::new(LocationMode::Secondary { warm })
    }

    pub fn attached(mode: AttachmentMode, generation: Generation) -> Self {
        Self::new(LocationMode::attached(mode, generation))
    }

    pub fn with_tenant_conf(mut self, tenant_conf: TenantConf) -> Self {
        self.tenant_conf = tenant_conf;
        self
    }
}

// ── Wire form ──────────────────────────────────────────────────────

/// Mode names as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationModeName {
    Detached,
    AttachedSingle,
    AttachedMulti,
    AttachedStale,
    Secondary,
}

/// Loosely-typed configuration command body.
///
/// ```text
/// { "mode": "AttachedSingle", "generation": 3, "secondary_conf": null, "tenant_conf": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfigRequest {
    pub mode: LocationModeName,
    #[serde(default)]
    pub generation: Option<u32>,
    #[serde(default)]
    pub secondary_conf: Option<SecondaryConf>,
    #[serde(default)]
    pub tenant_conf: TenantConf,
}

impl TryFrom<LocationConfigRequest> for LocationConf {
    type Error = CoreError;

    fn try_from(req: LocationConfigRequest) -> CoreResult<Self> {
        let conflict = |msg: &str| CoreError::ConfigConflict(format!("{:?}: {msg}", req.mode));

        let attached = |mode: AttachmentMode| -> CoreResult<LocationMode> {
            if req.secondary_conf.is_some() {
                return Err(conflict("attached modes take no secondary_conf"));
            }
            match req.generation {
                None => Err(conflict("attached modes require a generation")),
                Some(0) => Err(conflict("generation 0 is never issued")),
                Some(g) => Ok(LocationMode::attached(mode, Generation::new(g))),
            }
        };

        let mode = match req.mode {
            LocationModeName::AttachedSingle => attached(AttachmentMode::Single)?,
            LocationModeName::AttachedMulti => attached(AttachmentMode::Multi)?,
            LocationModeName::AttachedStale => attached(AttachmentMode::Stale)?,
            LocationModeName::Secondary => {
                if req.generation.is_some() {
                    return Err(conflict("secondary mode takes no generation"));
                }
                let conf = req
                    .secondary_conf
                    .ok_or_else(|| conflict("secondary mode requires secondary_conf"))?;
                LocationMode::Secondary { warm: conf.warm }
            }
            LocationModeName::Detached => {
                if req.generation.is_some() || req.secondary_conf.is_some() {
                    return Err(conflict("detached mode takes no generation or secondary_conf"));
                }
                LocationMode::Detached
            }
        };

        Ok(LocationConf {
            mode,
            tenant_conf: req.tenant_conf,
        })
    }
}

impl From<&LocationConf> for LocationConfigRequest {
    fn from(conf: &LocationConf) -> Self {
        Self {
            mode: conf.mode.name(),
            generation: conf.mode.generation().map(Generation::into_inner),
            secondary_conf: conf.mode.secondary_conf(),
            tenant_conf: conf.tenant_conf.clone(),
        }
    }
}
