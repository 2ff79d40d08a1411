// src/source/remote.rs
use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use tracing::{info, warn};

use crate::auth::TokenProvider;
use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::error::SourceError;
use crate::model::Item;
use crate::redact::anon_hash;
use crate::retry::{CallError, RetryPolicy};

use super::graph::{self, CalendarTransport, EventQuery};
use super::DataSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSourceConfig {
    /// `None` queries `/me`; set for application (daemon) permissions.
    pub user_id: Option<String>,
    pub window_days: i64,
    pub max_events: u32,
    pub cache_ttl: Duration,
}

impl Default for RemoteSourceConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            window_days: 7,
            max_events: 50,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Live calendar: cache → retry → token → transport → transform.
///
/// Token provider and cache are injected so one instance of each can be
/// shared by every source (and request) the host builds.
pub struct RemoteCalendarSource {
    tokens: Arc<TokenProvider>,
    cache: Arc<ResponseCache>,
    transport: Arc<dyn CalendarTransport>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    config: RemoteSourceConfig,
}

impl RemoteCalendarSource {
    pub fn new(
        tokens: Arc<TokenProvider>,
        cache: Arc<ResponseCache>,
        transport: Arc<dyn CalendarTransport>,
        config: RemoteSourceConfig,
    ) -> Self {
        Self {
            tokens,
            cache,
            transport,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn query(&self) -> EventQuery {
        let start = self.clock.now();
        EventQuery {
            user_id: self.config.user_id.clone(),
            start,
            end: start + TimeDelta::days(self.config.window_days.max(1)),
            top: self.config.max_events.clamp(1, graph::MAX_TOP),
        }
    }

    /// Identity is hashed so raw mailbox names never sit in cache keys or logs.
    fn cache_key(q: &EventQuery) -> String {
        format!(
            "{}:{}:{}:{}",
            anon_hash(q.user_id.as_deref().unwrap_or("me")),
            q.start.date_naive(),
            q.end.date_naive(),
            q.top
        )
    }

    async fn fetch_uncached(&self, q: &EventQuery) -> Result<Vec<Item>, SourceError> {
        let events = self
            .retry
            .run(move || async move {
                let token = self.tokens.get_token().await.map_err(CallError::Auth)?;
                self.transport.list_events(&token, q).await
            })
            .await?;

        let total = events.len();
        let items: Vec<Item> = events.iter().filter_map(graph::to_item).collect();
        info!(
            target: "source",
            source = "remote",
            received = total,
            kept = items.len(),
            "remote events transformed"
        );
        Ok(items)
    }
}

#[async_trait::async_trait]
impl DataSource for RemoteCalendarSource {
    async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
        let q = self.query();
        let key = Self::cache_key(&q);
        let result = self
            .cache
            .get_or_fetch(&key, self.config.cache_ttl, || self.fetch_uncached(&q))
            .await;
        if let Err(e) = &result {
            metrics::counter!("source_fetch_errors_total", "source" => "remote").increment(1);
            warn!(target: "source", source = "remote", error = %e, "remote fetch failed");
        }
        result
    }

    fn name(&self) -> &'static str {
        "remote"
    }

    async fn invalidate_credentials(&self) -> bool {
        self.tokens.invalidate();
        true
    }
}
