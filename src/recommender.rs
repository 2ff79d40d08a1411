//! # Recommender
//!
//! Orchestrates one call: validate input → fetch → score → stable sort →
//! truncate → count conflicts.
//!
//! This is the only layer that turns an error into a retry decision. When
//! the source reports a refreshable auth failure (the remote rejected our
//! token), the source's credentials are invalidated and the whole fetch is
//! retried exactly once. A second auth failure becomes `SourceUnavailable`.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::conflicts::count_conflicts;
use crate::error::{RecommendError, SourceError, UnavailableReason, ValidationError};
use crate::interests::{InterestSet, DEFAULT_MAX_INTERESTS};
use crate::model::{Explanation, Item, RecommendationResult};
use crate::scoring;
use crate::source::DataSource;
use crate::weights::WeightConfig;

pub const MAX_ITEM_ID_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct Recommender {
    weights: WeightConfig,
    max_interests: usize,
}

impl Default for Recommender {
    fn default() -> Self {
        Self::new(WeightConfig::default())
    }
}

impl Recommender {
    /// Weights are validated (clamped) once here.
    pub fn new(weights: WeightConfig) -> Self {
        Self {
            weights: weights.validated(),
            max_interests: DEFAULT_MAX_INTERESTS,
        }
    }

    pub fn with_max_interests(mut self, max: usize) -> Self {
        self.max_interests = max.max(1);
        self
    }

    pub fn weights(&self) -> &WeightConfig {
        &self.weights
    }

    pub fn max_interests(&self) -> usize {
        self.max_interests
    }

    pub async fn recommend(
        &self,
        source: &dyn DataSource,
        interests_raw: &str,
        top_n: i64,
    ) -> Result<RecommendationResult, RecommendError> {
        let started = Instant::now();
        metrics::counter!("recommend_requests_total", "source" => source.name()).increment(1);

        let (interests, top_n) = match self.validate(interests_raw, top_n) {
            Ok(v) => v,
            Err(e) => {
                metrics::counter!("recommend_validation_errors_total").increment(1);
                return Err(e.into());
            }
        };

        let items = self.fetch_with_refresh(source).await?;
        let fetched = items.len();

        let mut ranked = scoring::rank(items, &interests, &self.weights);
        ranked.truncate(top_n);
        let conflict_count = count_conflicts(ranked.iter().map(|s| s.item.slot()));

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("recommend_duration_ms").record(elapsed_ms);
        info!(
            target: "recommender",
            source = source.name(),
            interests = interests.len(),
            fetched,
            returned = ranked.len(),
            conflicts = conflict_count,
            elapsed_ms,
            "recommendation complete"
        );

        Ok(RecommendationResult {
            items: ranked,
            conflict_count,
        })
    }

    pub async fn explain(
        &self,
        source: &dyn DataSource,
        item_id: &str,
        interests_raw: &str,
    ) -> Result<Explanation, RecommendError> {
        let item_id = item_id.trim();
        if item_id.is_empty() || item_id.chars().count() > MAX_ITEM_ID_LEN {
            return Err(ValidationError::InvalidItemId {
                max: MAX_ITEM_ID_LEN,
            }
            .into());
        }
        let interests = InterestSet::parse(interests_raw, self.max_interests)?;

        let items = self.fetch_with_refresh(source).await?;
        let item = items
            .into_iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| RecommendError::ItemNotFound {
                id: item_id.to_string(),
            })?;

        let breakdown = scoring::score(&item, &interests, &self.weights);
        let matched_tags = scoring::matched_tags(&item, &interests);
        debug!(
            target: "recommender",
            source = source.name(),
            matched = matched_tags.len(),
            total = breakdown.total(),
            "explained item"
        );

        Ok(Explanation {
            id: item.id,
            title: item.title,
            breakdown,
            matched_tags,
        })
    }

    fn validate(
        &self,
        interests_raw: &str,
        top_n: i64,
    ) -> Result<(InterestSet, usize), ValidationError> {
        if top_n <= 0 {
            return Err(ValidationError::NonPositiveTopN(top_n));
        }
        let interests = InterestSet::parse(interests_raw, self.max_interests)?;
        if interests.is_empty() {
            return Err(ValidationError::EmptyInterests);
        }
        let top_n = usize::try_from(top_n).unwrap_or(usize::MAX);
        Ok((interests, top_n))
    }

    async fn fetch_with_refresh(&self, source: &dyn DataSource) -> Result<Vec<Item>, RecommendError> {
        match source.fetch().await {
            Ok(items) => Ok(items),
            Err(SourceError::Auth(e)) if e.is_refreshable() => {
                if !source.invalidate_credentials().await {
                    return Err(RecommendError::Auth(e));
                }
                warn!(
                    target: "recommender",
                    source = source.name(),
                    reason = e.reason_code(),
                    "auth rejected; refreshing credentials and retrying once"
                );
                match source.fetch().await {
                    Ok(items) => Ok(items),
                    Err(SourceError::Auth(again)) => {
                        metrics::counter!("source_fetch_errors_total", "source" => source.name())
                            .increment(1);
                        Err(RecommendError::SourceUnavailable {
                            reason: UnavailableReason::AuthRejected,
                            cause: Some(Box::new(again)),
                        })
                    }
                    Err(other) => Err(other.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::source::CatalogSource;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn catalog() -> CatalogSource {
        CatalogSource::new(vec![
            Item::new("safe-ai", "Safe AI", 9, 10)
                .with_tags(["ai", "safety"])
                .with_popularity(7.0),
            Item::new("ml-ops", "MLOps", 9, 10)
                .with_tags(["ml"])
                .with_popularity(9.0),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn reference_scenario() {
        let r = Recommender::new(WeightConfig::new(2.0, 0.5, 0.3));
        let res = r.recommend(&catalog(), "ai, safety", 2).await.unwrap();
        assert_eq!(res.items.len(), 2);
        assert_eq!(res.conflict_count, 1);

        let first = &res.items[0];
        assert_eq!(first.item.id, "safe-ai");
        assert!((first.breakdown.interest_match() - 4.0).abs() < 1e-9);
        assert!((first.breakdown.popularity() - 3.5).abs() < 1e-9);
        let diversity = 2.0 * scoring::DIVERSITY_UNIT * 0.3;
        assert!((first.breakdown.total() - (7.5 + diversity)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn validation_happens_before_fetch() {
        let r = Recommender::default();
        let err = r.recommend(&catalog(), "", 3).await.unwrap_err();
        assert!(matches!(
            err,
            RecommendError::Validation(ValidationError::EmptyInterests)
        ));
        let err = r.recommend(&catalog(), "ai", 0).await.unwrap_err();
        assert!(matches!(
            err,
            RecommendError::Validation(ValidationError::NonPositiveTopN(0))
        ));
    }

    #[tokio::test]
    async fn explain_reports_matched_tags_or_not_found() {
        let r = Recommender::default();
        let ex = r.explain(&catalog(), "safe-ai", "Safety; cloud").await.unwrap();
        assert_eq!(ex.matched_tags, vec!["safety".to_string()]);
        assert!((ex.breakdown.interest_match() - 2.0).abs() < 1e-9);

        let ex = r.explain(&catalog(), "ml-ops", "").await.unwrap();
        assert_eq!(ex.breakdown.interest_match(), 0.0);

        let err = r.explain(&catalog(), "nope", "ai").await.unwrap_err();
        assert!(matches!(err, RecommendError::ItemNotFound { ref id } if id == "nope"));

        let err = r.explain(&catalog(), "  ", "ai").await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    /// Fails with a token rejection for the first `failures` fetches.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        invalidated: AtomicBool,
    }

    #[async_trait::async_trait]
    impl DataSource for Flaky {
        async fn fetch(&self) -> Result<Vec<Item>, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(SourceError::Auth(AuthError::TokenRejected));
            }
            Ok(vec![Item::new("x", "X", 1, 2).with_tags(["ai"])])
        }

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn invalidate_credentials(&self) -> bool {
            self.invalidated.store(true, Ordering::SeqCst);
            true
        }
    }

    fn flaky(failures: usize) -> Flaky {
        Flaky {
            failures,
            calls: AtomicUsize::new(0),
            invalidated: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn one_auth_rejection_is_refreshed_and_retried() {
        let src = flaky(1);
        let res = Recommender::default().recommend(&src, "ai", 5).await.unwrap();
        assert_eq!(res.items.len(), 1);
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
        assert!(src.invalidated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn repeated_auth_rejection_becomes_source_unavailable() {
        let src = flaky(usize::MAX);
        let err = Recommender::default()
            .recommend(&src, "ai", 5)
            .await
            .unwrap_err();
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            err,
            RecommendError::SourceUnavailable {
                reason: UnavailableReason::AuthRejected,
                ..
            }
        ));
    }
}
