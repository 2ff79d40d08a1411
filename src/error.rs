//! Error taxonomy for the recommender core.
//!
//! Callers only ever see one of four kinds ([`RecommendError`]): validation,
//! auth, source-unavailable, item-not-found. Lower layers use [`SourceError`]
//! and [`AuthError`] so the orchestrator can decide on its single
//! refresh-and-retry before translating.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Boxed cause kept behind a `SourceUnavailable` so transport detail stays
/// available to logs without being part of the user-facing message.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Malformed or out-of-range caller input. Never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("at least one interest is required")]
    EmptyInterests,

    #[error("too many interests: {count} (max {max})")]
    TooManyInterests { count: usize, max: usize },

    #[error("interests too long: {len} chars (max {max})")]
    InterestsTooLong { len: usize, max: usize },

    #[error("interests contain invalid characters")]
    InvalidCharacters,

    #[error("top_n must be a positive integer, got {0}")]
    NonPositiveTopN(i64),

    #[error("weight '{field}' must be a non-negative number, got {value}")]
    InvalidWeight { field: &'static str, value: f64 },

    #[error("item id must be between 1 and {max} characters")]
    InvalidItemId { max: usize },
}

/// Credential missing, invalid, or rejected. Carries a reason code but never
/// the secret itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials not configured: {}", .missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    /// The token authority refused the client credentials (e.g. `invalid_client`).
    #[error("credential rejected by token authority ({code})")]
    Rejected { code: String },

    /// The calendar API answered 401 for a token we believed valid.
    #[error("access token rejected by remote source")]
    TokenRejected,

    #[error("token exchange failed: {reason}")]
    Exchange { reason: String },

    #[error("malformed token response: {reason}")]
    MalformedResponse { reason: String },
}

impl AuthError {
    /// Stable machine-readable code for logs and API bodies.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials { .. } => "missing_credentials",
            AuthError::Rejected { .. } => "credential_rejected",
            AuthError::TokenRejected => "token_rejected",
            AuthError::Exchange { .. } => "exchange_failed",
            AuthError::MalformedResponse { .. } => "malformed_token_response",
        }
    }

    /// Whether dropping the cached token and authenticating again can help.
    /// Configuration problems and refused credentials cannot be fixed by a refresh.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, AuthError::TokenRejected | AuthError::Exchange { .. })
    }
}

/// Why a source could not produce items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NoItems,
    NotConfigured,
    Network,
    Timeout,
    RateLimited,
    MalformedResponse,
    Upstream(u16),
    AuthRejected,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NoItems => f.write_str("no items"),
            UnavailableReason::NotConfigured => f.write_str("source not configured"),
            UnavailableReason::Network => f.write_str("network failure"),
            UnavailableReason::Timeout => f.write_str("request timed out"),
            UnavailableReason::RateLimited => f.write_str("rate limited"),
            UnavailableReason::MalformedResponse => f.write_str("malformed response"),
            UnavailableReason::Upstream(status) => write!(f, "upstream returned HTTP {status}"),
            UnavailableReason::AuthRejected => {
                f.write_str("authentication rejected after token refresh")
            }
        }
    }
}

/// Failure of a [`crate::source::DataSource`] fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("source unavailable: {reason}")]
    Unavailable {
        reason: UnavailableReason,
        #[source]
        cause: Option<BoxError>,
    },
}

impl SourceError {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        SourceError::Unavailable {
            reason,
            cause: None,
        }
    }

    pub fn unavailable_with<E>(reason: UnavailableReason, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        SourceError::Unavailable {
            reason,
            cause: Some(cause.into()),
        }
    }
}

/// The only error type a host sees from `recommend` / `explain`.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("authentication failed: {0}")]
    Auth(AuthError),

    #[error("source unavailable: {reason}")]
    SourceUnavailable {
        reason: UnavailableReason,
        #[source]
        cause: Option<BoxError>,
    },

    #[error("item not found: {id}")]
    ItemNotFound { id: String },
}

impl RecommendError {
    /// Short kind tag used in API bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RecommendError::Validation(_) => "validation",
            RecommendError::Auth(_) => "auth",
            RecommendError::SourceUnavailable { .. } => "source_unavailable",
            RecommendError::ItemNotFound { .. } => "item_not_found",
        }
    }
}

impl From<SourceError> for RecommendError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Auth(e) => RecommendError::Auth(e),
            SourceError::Unavailable { reason, cause } => {
                RecommendError::SourceUnavailable { reason, cause }
            }
        }
    }
}
