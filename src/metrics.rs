use anyhow::Context;
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use shuttle_axum::axum::{routing::get, Router};

static GLOBAL: OnceCell<Metrics> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the Prometheus recorder once per process and describes every
    /// series the crate emits. Later calls return the same handle.
    pub fn init() -> anyhow::Result<Self> {
        GLOBAL
            .get_or_try_init(|| {
                let handle = PrometheusBuilder::new()
                    .install_recorder()
                    .context("installing prometheus recorder")?;
                describe();
                Ok::<_, anyhow::Error>(Self { handle })
            })
            .cloned()
    }

    /// `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe() {
    describe_counter!("recommend_requests_total", "Recommendation calls by source");
    describe_counter!(
        "recommend_validation_errors_total",
        "Recommendation calls rejected before fetching"
    );
    describe_histogram!(
        "recommend_duration_ms",
        Unit::Milliseconds,
        "End-to-end recommendation latency"
    );
    describe_counter!("source_fetch_errors_total", "Failed source fetches by source");
    describe_counter!("remote_cache_hits_total", "Remote response cache hits");
    describe_counter!("remote_cache_misses_total", "Remote response cache misses");
    describe_counter!("remote_retry_attempts_total", "Remote calls retried after a failure");
    describe_counter!("remote_rate_limited_total", "Remote calls answered with 429");
    describe_counter!("auth_token_cache_hits_total", "Token requests served from cache");
    describe_counter!("auth_token_exchanges_total", "Token exchanges against the authority");
}
