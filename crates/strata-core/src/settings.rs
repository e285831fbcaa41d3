//! Tenant settings resolved from node defaults plus `TenantConf` overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::location::TenantConf;

pub const CHECKPOINT_DISTANCE: &str = "checkpoint_distance";
pub const HEATMAP_PERIOD: &str = "heatmap_period";

/// Effective per-tenant tuning used by the data plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    /// Number of log records gathered in the open layer before it is frozen.
    pub checkpoint_distance: usize,
    /// How often an attached tenant publishes its heatmap.
    #[serde(with = "duration_str")]
    pub heatmap_period: Duration,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            checkpoint_distance: 64,
            heatmap_period: Duration::from_secs(60),
        }
    }
}

impl TenantSettings {
    /// Apply the overrides in `conf` on top of `self`.
    ///
    /// Unknown keys are passed through untouched; known keys with values
    /// that do not parse are rejected.
    pub fn resolve(&self, conf: &TenantConf) -> CoreResult<Self> {
        let mut out = self.clone();
        if let Some(v) = conf.get(CHECKPOINT_DISTANCE) {
            out.checkpoint_distance = match v.parse::<usize>() {
                Ok(0) | Err(_) => return Err(invalid(CHECKPOINT_DISTANCE, v, "expected a positive integer")),
                Ok(n) => n,
            };
        }
        if let Some(v) = conf.get(HEATMAP_PERIOD) {
            out.heatmap_period =
                parse_duration(v).ok_or_else(|| invalid(HEATMAP_PERIOD, v, "expected e.g. 30s, 5m, 250ms"))?;
        }
        Ok(out)
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> CoreError {
    CoreError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `250ms`, `30s`, `5m` or `1h`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        None
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&format_args!("{}ms", d.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_duration(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {s:?}")))
    }
}
