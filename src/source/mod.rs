// src/source/mod.rs
//! Where items come from.
//!
//! A [`DataSource`] is picked by the host at construction time. Scoring never
//! branches on which one it got.

pub mod catalog;
pub mod graph;
pub mod remote;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::model::Item;

pub use catalog::CatalogSource;
pub use remote::{RemoteCalendarSource, RemoteSourceConfig};

#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Normalized items for one recommendation call.
    async fn fetch(&self) -> Result<Vec<Item>, SourceError>;

    fn name(&self) -> &'static str;

    /// Drop any cached credential so the next `fetch` re-authenticates.
    /// Returns `false` when there is nothing to refresh.
    async fn invalidate_credentials(&self) -> bool {
        false
    }
}

/// Host-side selector for the two source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    Catalog,
    Remote,
}

impl SourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Catalog => "catalog",
            SourceName::Remote => "remote",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source '{0}' (expected 'catalog' or 'remote')")]
pub struct UnknownSource(pub String);

impl FromStr for SourceName {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "catalog" | "manifest" => Ok(SourceName::Catalog),
            "remote" | "graph" => Ok(SourceName::Remote),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}
