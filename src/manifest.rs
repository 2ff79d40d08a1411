//! # Catalog manifest
//!
//! JSON document describing a static event: sessions plus optional scoring
//! weights, a default result size and the profile store location.
//!
//! ```text
//! {
//!   "weights": { "interest": 2.0, "popularity": 0.5, "diversity": 0.3 },
//!   "recommend": { "max_sessions_default": 3 },
//!   "profile": { "storage_file": "profiles.json" },
//!   "features": { "externalSessions": { "enabled": false, "file": "sessions_external.json" } },
//!   "sessions": [
//!     { "id": "s1", "title": "Intro to AI", "start": "09:00", "end": "10:00",
//!       "location": "Hall A", "tags": ["ai"], "popularity": 0.7 }
//!   ]
//! }
//! ```
//!
//! Session times may be integers, `"HH:MM"` (minutes since midnight) or RFC
//! 3339 timestamps (unix seconds). Only equality and order matter downstream.
//! When external sessions are enabled and the file yields at least one
//! session, it replaces the inline list.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveTime, Timelike};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::Item;
use crate::source::CatalogSource;
use crate::weights::WeightConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub weights: Option<WeightConfig>,
    #[serde(default)]
    pub recommend: RecommendSection,
    #[serde(default)]
    pub profile: ProfileSection,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub sessions: Vec<ManifestSession>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendSection {
    pub max_sessions_default: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSection {
    pub storage_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Features {
    #[serde(default, rename = "externalSessions")]
    pub external_sessions: ExternalSessions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalSessions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_external_file")]
    pub file: PathBuf,
}

impl Default for ExternalSessions {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_external_file(),
        }
    }
}

fn default_external_file() -> PathBuf {
    PathBuf::from("sessions_external.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSession {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub start: Value,
    pub end: Value,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub popularity: f64,
}

impl ManifestSession {
    fn to_item(&self) -> Result<Item> {
        let start = parse_slot(&self.start)
            .with_context(|| format!("session '{}': bad start", self.title))?;
        let end =
            parse_slot(&self.end).with_context(|| format!("session '{}': bad end", self.title))?;
        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.title);

        let mut item = Item::new(id, self.title.clone(), start, end)
            .with_tags(&self.tags)
            .with_popularity(self.popularity);
        item.location = self
            .location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(item)
    }
}

/// Integer, `"HH:MM"`, numeric string, or RFC 3339.
pub fn parse_slot(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| anyhow!("number out of range: {n}")),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Ok(n);
            }
            if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M") {
                return Ok(i64::from(t.hour() * 60 + t.minute()));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.timestamp());
            }
            bail!("unrecognized time '{s}'")
        }
        other => bail!("expected number or string, got {other}"),
    }
}

impl Manifest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let mut m: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        m.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(m)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Manifest weights, validated, or `fallback` when absent.
    pub fn weights_or(&self, fallback: WeightConfig) -> WeightConfig {
        self.weights.unwrap_or(fallback).validated()
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() || p.exists() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// Profile store location, relative paths resolved against the manifest.
    pub fn profile_path(&self) -> Option<PathBuf> {
        self.profile.storage_file.as_deref().map(|p| self.resolve(p))
    }

    fn external_sessions(&self) -> Vec<ManifestSession> {
        let ext = &self.features.external_sessions;
        if !ext.enabled {
            return Vec::new();
        }
        let path = self.resolve(&ext.file);
        let raw = match fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "source", path = %path.display(), error = %e, "external sessions unreadable");
                return Vec::new();
            }
        };
        // Tolerant: skip entries that don't look like sessions.
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            Err(e) => {
                warn!(target: "source", path = %path.display(), error = %e, "external sessions not a JSON list");
                Vec::new()
            }
        }
    }

    pub fn items(&self) -> Result<Vec<Item>> {
        let external = self.external_sessions();
        let sessions = if external.is_empty() {
            &self.sessions
        } else {
            info!(target: "source", count = external.len(), "using external sessions");
            &external
        };
        sessions.iter().map(ManifestSession::to_item).collect()
    }

    pub fn catalog(&self) -> Result<CatalogSource> {
        Ok(CatalogSource::new(self.items()?)?)
    }
}
