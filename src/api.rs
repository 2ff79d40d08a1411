// src/api.rs
//! Thin HTTP surface over the recommender. Parses query strings into
//! primitives, picks the source, and maps typed errors onto status codes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::{RecommendError, SourceError, UnavailableReason, ValidationError};
use crate::interests::InterestSet;
use crate::itinerary;
use crate::model::{Explanation, RecommendationResult};
use crate::profile::ProfileStore;
use crate::recommender::{Recommender, MAX_ITEM_ID_LEN};
use crate::source::{DataSource, SourceName, UnknownSource};

/// Sources the host wired up at startup. Either may be absent.
#[derive(Clone, Default)]
pub struct Sources {
    catalog: Option<Arc<dyn DataSource>>,
    remote: Option<Arc<dyn DataSource>>,
}

impl Sources {
    pub fn with_catalog(mut self, src: Arc<dyn DataSource>) -> Self {
        self.catalog = Some(src);
        self
    }

    pub fn with_remote(mut self, src: Arc<dyn DataSource>) -> Self {
        self.remote = Some(src);
        self
    }

    pub fn get(&self, name: SourceName) -> Option<Arc<dyn DataSource>> {
        match name {
            SourceName::Catalog => self.catalog.clone(),
            SourceName::Remote => self.remote.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub recommender: Arc<Recommender>,
    pub sources: Sources,
    pub profiles: Option<Arc<ProfileStore>>,
    pub default_source: SourceName,
    pub default_top_n: i64,
    pub max_top_n: i64,
}

impl AppState {
    pub fn new(recommender: Recommender, sources: Sources) -> Self {
        Self {
            recommender: Arc::new(recommender),
            sources,
            profiles: None,
            default_source: SourceName::Catalog,
            default_top_n: 5,
            max_top_n: 50,
        }
    }

    pub fn with_profiles(mut self, store: ProfileStore) -> Self {
        self.profiles = Some(Arc::new(store));
        self
    }

    fn source(&self, raw: Option<&str>) -> Result<(SourceName, Arc<dyn DataSource>), ApiError> {
        let name = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse::<SourceName>()?,
            None => self.default_source,
        };
        let src = self.sources.get(name).ok_or_else(|| {
            ApiError::Core(SourceError::unavailable(UnavailableReason::NotConfigured).into())
        })?;
        Ok((name, src))
    }

    /// Typed interests win; otherwise the saved profile, if one was named.
    fn interests(&self, typed: Option<String>, profile: Option<&str>) -> Result<String, ApiError> {
        if let Some(raw) = typed.filter(|s| !s.trim().is_empty()) {
            return Ok(raw);
        }
        let Some(key) = profile.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(String::new());
        };
        let store = self.profiles.as_ref().ok_or(ApiError::ProfilesDisabled)?;
        store
            .load(key)
            .ok_or_else(|| ApiError::ProfileNotFound(key.to_string()))
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/recommend", get(recommend))
        .route("/explain", get(explain))
        .route("/export", get(export))
        .route("/profiles/{key}", get(get_profile).put(put_profile))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RecommendParams {
    source: Option<String>,
    interests: Option<String>,
    top: Option<i64>,
    profile: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecommendResp {
    source: SourceName,
    #[serde(flatten)]
    result: RecommendationResult,
}

async fn recommend(
    State(state): State<AppState>,
    Query(q): Query<RecommendParams>,
) -> Result<Json<RecommendResp>, ApiError> {
    let (name, _, result) = run_recommend(&state, q).await?;
    Ok(Json(RecommendResp {
        source: name,
        result,
    }))
}

async fn run_recommend(
    state: &AppState,
    q: RecommendParams,
) -> Result<(SourceName, String, RecommendationResult), ApiError> {
    let (name, src) = state.source(q.source.as_deref())?;
    let interests = state.interests(q.interests, q.profile.as_deref())?;
    let top = q.top.unwrap_or(state.default_top_n);
    if top > state.max_top_n {
        return Err(ApiError::TopTooLarge {
            max: state.max_top_n,
        });
    }

    let result = state
        .recommender
        .recommend(src.as_ref(), &interests, top)
        .await?;
    Ok((name, interests, result))
}

#[derive(Debug, Serialize)]
struct ExportResp {
    source: SourceName,
    markdown: String,
    session_count: usize,
    conflict_count: usize,
}

/// Same inputs as `/recommend`, rendered as a markdown itinerary.
async fn export(
    State(state): State<AppState>,
    Query(q): Query<RecommendParams>,
) -> Result<Json<ExportResp>, ApiError> {
    let (name, raw, result) = run_recommend(&state, q).await?;
    // Already validated by `recommend`.
    let interests = InterestSet::parse(&raw, state.recommender.max_interests())
        .map_err(|e| ApiError::Core(e.into()))?;
    let markdown = itinerary::render_markdown(&interests, &result);
    info!(target: "api", sessions = result.items.len(), "itinerary exported");
    Ok(Json(ExportResp {
        source: name,
        markdown,
        session_count: result.items.len(),
        conflict_count: result.conflict_count,
    }))
}

#[derive(Debug, Deserialize)]
struct ExplainParams {
    source: Option<String>,
    id: Option<String>,
    interests: Option<String>,
    profile: Option<String>,
}

async fn explain(
    State(state): State<AppState>,
    Query(q): Query<ExplainParams>,
) -> Result<Json<Explanation>, ApiError> {
    let id = q.id.ok_or(ApiError::Core(
        ValidationError::InvalidItemId {
            max: MAX_ITEM_ID_LEN,
        }
        .into(),
    ))?;
    let (_, src) = state.source(q.source.as_deref())?;
    let interests = state.interests(q.interests, q.profile.as_deref())?;
    let ex = state
        .recommender
        .explain(src.as_ref(), &id, &interests)
        .await?;
    Ok(Json(ex))
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileBody {
    interests: String,
}

async fn get_profile(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ProfileBody>, ApiError> {
    let interests = state.interests(None, Some(&key))?;
    Ok(Json(ProfileBody { interests }))
}

async fn put_profile(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ProfileBody>,
) -> Result<Json<ProfileBody>, ApiError> {
    let store = state.profiles.as_ref().ok_or(ApiError::ProfilesDisabled)?;
    let set = InterestSet::parse(&body.interests, state.recommender.max_interests())
        .map_err(|e| ApiError::Core(e.into()))?;
    if set.is_empty() {
        return Err(ApiError::Core(ValidationError::EmptyInterests.into()));
    }
    store.save(&key, &set).map_err(ApiError::Internal)?;
    info!(target: "api", interests = set.len(), "profile saved");
    Ok(Json(ProfileBody {
        interests: set.to_raw(),
    }))
}

#[derive(Debug)]
pub enum ApiError {
    Core(RecommendError),
    UnknownSource(UnknownSource),
    TopTooLarge { max: i64 },
    ProfileNotFound(String),
    ProfilesDisabled,
    Internal(anyhow::Error),
}

impl From<RecommendError> for ApiError {
    fn from(e: RecommendError) -> Self {
        ApiError::Core(e)
    }
}

impl From<UnknownSource> for ApiError {
    fn from(e: UnknownSource) -> Self {
        ApiError::UnknownSource(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Core(e) => {
                let status = match e {
                    RecommendError::Validation(_) => StatusCode::BAD_REQUEST,
                    RecommendError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
                    RecommendError::Auth(_) => StatusCode::BAD_GATEWAY,
                    RecommendError::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::UnknownSource(e) => (StatusCode::BAD_REQUEST, "validation", e.to_string()),
            ApiError::TopTooLarge { max } => (
                StatusCode::BAD_REQUEST,
                "validation",
                format!("top must be at most {max}"),
            ),
            ApiError::ProfileNotFound(key) => (
                StatusCode::NOT_FOUND,
                "profile_not_found",
                format!("no saved profile '{key}'"),
            ),
            ApiError::ProfilesDisabled => (
                StatusCode::NOT_FOUND,
                "profile_not_found",
                "profile store is not configured".to_string(),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        if status.is_server_error() {
            match &self {
                ApiError::Internal(e) => warn!(target: "api", error = %e, "request failed"),
                _ => warn!(target: "api", %status, kind = error, %message, "request failed"),
            }
        }
        (status, Json(ErrorBody { error, message })).into_response()
    }
}
