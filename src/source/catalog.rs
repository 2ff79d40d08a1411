// src/source/catalog.rs
use std::collections::HashSet;

use tracing::debug;

use crate::error::{SourceError, UnavailableReason};
use crate::model::Item;

use super::DataSource;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("duplicate item id '{0}' in catalog")]
pub struct DuplicateId(pub String);

/// A fixed, already-loaded collection. Loading is the caller's job.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    items: Vec<Item>,
}

impl CatalogSource {
    /// Items are normalized on the way in. Ids must be unique.
    pub fn new(items: Vec<Item>) -> Result<Self, DuplicateId> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id.as_str()) {
                return Err(DuplicateId(item.id.clone()));
            }
        }
        Ok(Self {
            items: items.into_iter().map(Item::normalized).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait::async_trait]
impl DataSource for CatalogSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        if self.items.is_empty() {
            return Err(SourceError::unavailable(UnavailableReason::NoItems));
        }
        debug!(target: "source", source = "catalog", count = self.items.len(), "serving catalog");
        Ok(self.items.clone())
    }

    fn name(&self) -> &'static str {
        "catalog"
    }
}
