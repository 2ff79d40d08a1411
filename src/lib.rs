// src/lib.rs
// Public library surface for the binary, integration tests and reuse.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod interests;
pub mod itinerary;
pub mod manifest;
pub mod metrics;
pub mod model;
pub mod profile;
pub mod recommender;
pub mod redact;
pub mod retry;
pub mod scoring;
pub mod source;
pub mod weights;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::error::{AuthError, RecommendError, SourceError, ValidationError};
pub use crate::interests::InterestSet;
pub use crate::model::{Explanation, Item, RecommendationResult, ScoreBreakdown, ScoredItem};
pub use crate::recommender::Recommender;
pub use crate::source::{CatalogSource, DataSource, RemoteCalendarSource, SourceName};
pub use crate::weights::WeightConfig;

use shuttle_axum::axum::Router;
use tracing::info;

use crate::config::{GraphSettings, RecommenderConfig};

/// Loads config and environment, builds every source, returns the router.
/// Call after `dotenvy::dotenv()` and tracing init.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = RecommenderConfig::load()?;
    let graph = GraphSettings::from_env();
    info!(target: "recommender", ?graph, "starting");

    let state = bootstrap::build_state(&cfg, &graph)?;
    let metrics = if bootstrap::metrics_enabled() {
        Some(crate::metrics::Metrics::init()?)
    } else {
        None
    };
    Ok(bootstrap::build_router(state, metrics.as_ref()))
}
