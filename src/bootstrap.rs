// src/bootstrap.rs
//! Wires config, manifest and environment into an [`AppState`] and router.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use shuttle_axum::axum::Router;
use tracing::{info, warn};

use crate::api::{create_router, AppState, Sources};
use crate::auth::{ClientCredentialsExchange, TokenProvider, TokenStore};
use crate::cache::ResponseCache;
use crate::config::{GraphSettings, RecommenderConfig};
use crate::manifest::Manifest;
use crate::metrics::Metrics;
use crate::profile::ProfileStore;
use crate::recommender::Recommender;
use crate::source::graph::{token_url, GraphTransport, GRAPH_SCOPE};
use crate::source::{RemoteCalendarSource, SourceName};

pub const ENV_METRICS: &str = "RECOMMENDER_METRICS";

const USER_AGENT: &str = concat!("event-recommender/", env!("CARGO_PKG_VERSION"));

/// Live calendar source over the Graph-style HTTP API.
pub fn build_remote(
    cfg: &RecommenderConfig,
    graph: &GraphSettings,
) -> anyhow::Result<RemoteCalendarSource> {
    let remote = &cfg.remote;
    let (tenant, client_id, secret) = graph.credentials()?;

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_millis(remote.connect_timeout_ms))
        .timeout(Duration::from_millis(remote.request_timeout_ms))
        .build()
        .context("building http client")?;

    let exchange = ClientCredentialsExchange::new(
        http.clone(),
        token_url(&remote.authority_url, tenant),
        client_id,
        secret,
        GRAPH_SCOPE,
    )?;
    let mut tokens = TokenProvider::new(Arc::new(exchange))
        .with_timeout(Duration::from_millis(remote.token_timeout_ms));
    if let Some(path) = &remote.token_cache_path {
        tokens = tokens.with_store(TokenStore::new(path));
    }

    let transport = GraphTransport::new(http, remote.base_url.clone());
    Ok(RemoteCalendarSource::new(
        Arc::new(tokens),
        Arc::new(ResponseCache::default()),
        Arc::new(transport),
        remote.source_config(graph.user_id.clone()),
    )
    .with_retry(cfg.retry))
}

pub fn build_state(cfg: &RecommenderConfig, graph: &GraphSettings) -> anyhow::Result<AppState> {
    let manifest = match Manifest::load(&cfg.paths.manifest) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(target: "source", error = %format!("{e:#}"), "no catalog manifest; catalog source disabled");
            None
        }
    };

    let mut sources = Sources::default();
    let mut weights = cfg.weights;
    let mut default_top_n = cfg.limits.default_top_n;
    let mut profiles_path = cfg.paths.profiles.clone();

    if let Some(m) = &manifest {
        weights = m.weights_or(weights);
        if let Some(n) = m.recommend.max_sessions_default {
            default_top_n = n.clamp(1, cfg.limits.max_top_n);
        }
        if profiles_path.is_none() {
            profiles_path = m.profile_path();
        }
        let catalog = m.catalog().context("building catalog from manifest")?;
        info!(target: "source", items = catalog.len(), "catalog loaded");
        sources = sources.with_catalog(Arc::new(catalog));
    }

    let remote_ready = graph.enabled && graph.is_ready();
    if remote_ready {
        sources = sources.with_remote(Arc::new(build_remote(cfg, graph)?));
        info!(target: "source", "remote calendar source enabled");
    } else if graph.enabled {
        warn!(
            target: "source",
            missing = ?graph.validation_errors(),
            "remote calendar enabled but credentials incomplete"
        );
    }

    let recommender = Recommender::new(weights).with_max_interests(cfg.limits.max_interests);
    let mut state = AppState::new(recommender, sources);
    state.default_top_n = default_top_n;
    state.max_top_n = cfg.limits.max_top_n;
    if manifest.is_none() && remote_ready {
        state.default_source = SourceName::Remote;
    }
    if let Some(path) = profiles_path {
        state = state.with_profiles(ProfileStore::new(path));
    }
    Ok(state)
}

pub fn metrics_enabled() -> bool {
    env::var(ENV_METRICS).is_ok_and(|v| v.trim() == "1")
}

/// Recommendation routes, plus `/metrics` when enabled.
pub fn build_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = create_router(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}
