//! # Access tokens for the remote calendar
//!
//! [`TokenProvider`] owns the one cached bearer token and hands it out while
//! `now < expires_at - safety_margin` (the margin never exceeds half the
//! token's lifetime). When a new one is needed, exactly one
//! caller performs the exchange; concurrent callers park on the refresh lock
//! and pick up its result (success or failure) instead of starting their own.
//!
//! The exchange itself sits behind [`TokenExchange`] so tests can count calls;
//! [`ClientCredentialsExchange`] is the OAuth2 client-credentials flow over
//! `reqwest`.
//!
//! Token values and the client secret never reach logs or error messages;
//! only a short sha256 fingerprint is logged.

use std::{
    fmt, fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::redact::fingerprint;

pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Longest token lifetime we accept from an authority (one week).
pub const MAX_EXPIRES_IN_SECS: i64 = 7 * 24 * 3600;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// `margin` is capped at half the issued lifetime, so a token shorter
    /// than the margin is still reused for a while.
    pub fn is_usable(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        let margin = match self.issued_at {
            Some(issued) => margin.min(self.expires_at.signed_duration_since(issued) / 2),
            None => margin,
        };
        self.expires_at
            .checked_sub_signed(margin)
            .is_some_and(|limit| now < limit)
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &fingerprint(&self.value))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unauthenticated,
    Authenticating,
    Valid,
    ExpiringSoon,
    Invalidated,
}

/// What a successful exchange hands back.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: TimeDelta,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &fingerprint(&self.access_token))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<IssuedToken, AuthError>;
}

/// OAuth2 client-credentials grant (form POST to the authority's token URL).
pub struct ClientCredentialsExchange {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl fmt::Debug for ClientCredentialsExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsExchange")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl ClientCredentialsExchange {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let mut missing = Vec::new();
        if client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if !missing.is_empty() {
            return Err(AuthError::MissingCredentials { missing });
        }
        Ok(Self {
            http,
            token_url: token_url.into(),
            client_id,
            client_secret,
            scope: scope.into(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<serde_json::Value>,
    error: Option<String>,
}

#[async_trait]
impl TokenExchange for ClientCredentialsExchange {
    async fn exchange(&self) -> Result<IssuedToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Exchange {
                reason: describe_transport(&e),
            })?;

        let status = resp.status();
        let raw = resp.text().await.map_err(|e| AuthError::Exchange {
            reason: describe_transport(&e),
        })?;
        let body: TokenResponse = match serde_json::from_str(&raw) {
            Ok(b) => b,
            // Gateways answer outages with HTML; that is a failed exchange, not a bad grant.
            Err(_) if !status.is_success() => {
                return Err(AuthError::Exchange {
                    reason: format!("HTTP {}", status.as_u16()),
                })
            }
            Err(_) => {
                return Err(AuthError::MalformedResponse {
                    reason: format!("non-JSON body (HTTP {})", status.as_u16()),
                })
            }
        };

        if let Some(code) = body.error {
            return Err(AuthError::Rejected { code });
        }
        if !status.is_success() {
            return Err(AuthError::Exchange {
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse {
                reason: "missing access_token".into(),
            })?;
        let secs = match body.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_in = lifetime(secs).ok_or_else(|| AuthError::MalformedResponse {
            reason: format!("expires_in out of range ({secs})"),
        })?;

        Ok(IssuedToken {
            access_token,
            expires_in,
        })
    }
}

/// `secs` as a token lifetime, if it lies in `1..=MAX_EXPIRES_IN_SECS`.
fn lifetime(secs: i64) -> Option<TimeDelta> {
    if (1..=MAX_EXPIRES_IN_SECS).contains(&secs) {
        TimeDelta::try_seconds(secs)
    } else {
        None
    }
}

/// Short description of a transport failure. Never includes the request body.
pub(crate) fn describe_transport(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".into()
    } else if e.is_connect() {
        "connection failed".into()
    } else if e.is_decode() {
        "could not decode response".into()
    } else {
        "request failed".into()
    }
}

/// Owner-only JSON file holding the last token across restarts.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Option<CachedToken>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let token = serde_json::from_str(&raw)
            .with_context(|| format!("parsing token cache {}", self.path.display()))?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &CachedToken) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let data = serde_json::to_vec(token)?;
        write_private(&self.path, &data)
            .with_context(|| format!("writing token cache {}", self.path.display()))
    }
}

fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts.open(path)?;
    f.write_all(data)?;
    f.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Slot {
    token: Option<CachedToken>,
    invalidated: bool,
    /// Bumped after every finished exchange, successful or not.
    generation: u64,
    /// Outcome of the exchange that produced `generation`, handed to callers
    /// that queued behind it. Cleared by `invalidate`.
    last_outcome: Option<(u64, Result<String, AuthError>)>,
}

pub struct TokenProvider {
    exchange: Arc<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    margin: TimeDelta,
    timeout: Duration,
    store: Option<TokenStore>,
    slot: Mutex<Slot>,
    /// Held for the whole exchange; `state()` reads "authenticating" off it.
    refresh: tokio::sync::Mutex<()>,
}

impl TokenProvider {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            clock: Arc::new(SystemClock),
            margin: TimeDelta::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
            store: None,
            slot: Mutex::new(Slot::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_safety_margin(mut self, margin: TimeDelta) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist tokens to `store` and seed from it if it holds a usable one.
    pub fn with_store(mut self, store: TokenStore) -> Self {
        match store.load() {
            Ok(Some(token)) if token.is_usable(self.clock.now(), self.margin) => {
                debug!(target: "auth", fingerprint = %fingerprint(&token.value), "seeded token from disk");
                self.lock_slot().token = Some(token);
            }
            Ok(_) => {}
            Err(e) => warn!(target: "auth", error = %e, "ignoring unreadable token cache"),
        }
        self.store = Some(store);
        self
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cached(&self) -> Option<String> {
        let now = self.clock.now();
        self.lock_slot()
            .token
            .as_ref()
            .filter(|t| t.is_usable(now, self.margin))
            .map(|t| t.value.clone())
    }

    /// A usable bearer token, exchanging for a new one only when needed.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        if let Some(v) = self.cached() {
            metrics::counter!("auth_token_cache_hits_total").increment(1);
            return Ok(v);
        }

        let seen = self.lock_slot().generation;
        let _guard = self.refresh.lock().await;

        // Whoever held the lock before us may already have finished the work.
        if let Some(v) = self.cached() {
            metrics::counter!("auth_token_cache_hits_total").increment(1);
            return Ok(v);
        }
        // Short-lived tokens never look usable to `cached`, so hand out the
        // finished exchange's outcome directly.
        {
            let slot = self.lock_slot();
            if slot.generation != seen {
                if let Some((produced_at, outcome)) = &slot.last_outcome {
                    if *produced_at == slot.generation {
                        return outcome.clone();
                    }
                }
            }
        }

        let result = self.exchange_once().await;

        let mut slot = self.lock_slot();
        slot.generation += 1;
        match result {
            Ok(token) => {
                let value = token.value.clone();
                slot.token = Some(token.clone());
                slot.invalidated = false;
                let produced_at = slot.generation;
                slot.last_outcome = Some((produced_at, Ok(value.clone())));
                drop(slot);
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(&token) {
                        warn!(target: "auth", error = %e, "failed to persist token");
                    }
                }
                Ok(value)
            }
            Err(e) => {
                let failed_at = slot.generation;
                slot.last_outcome = Some((failed_at, Err(e.clone())));
                Err(e)
            }
        }
    }

    async fn exchange_once(&self) -> Result<CachedToken, AuthError> {
        metrics::counter!("auth_token_exchanges_total").increment(1);
        let issued = match tokio::time::timeout(self.timeout, self.exchange.exchange()).await {
            Ok(r) => r,
            Err(_) => Err(AuthError::Exchange {
                reason: "timed out".into(),
            }),
        };
        let now = self.clock.now();
        let issued = issued.and_then(|t| {
            let expires_at = Some(t.expires_in)
                .filter(|d| *d > TimeDelta::zero())
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| AuthError::MalformedResponse {
                    reason: "token lifetime out of range".into(),
                })?;
            Ok((t, expires_at))
        });
        match issued {
            Ok((t, expires_at)) => {
                let token = CachedToken {
                    expires_at,
                    issued_at: Some(now),
                    value: t.access_token,
                };
                info!(
                    target: "auth",
                    fingerprint = %fingerprint(&token.value),
                    expires_at = %token.expires_at,
                    "acquired access token"
                );
                Ok(token)
            }
            Err(e) => {
                warn!(target: "auth", reason = e.reason_code(), "token exchange failed");
                Err(e)
            }
        }
    }

    /// Drop the cached token so the next call authenticates again.
    pub fn invalidate(&self) {
        let mut slot = self.lock_slot();
        if slot.token.take().is_some() {
            info!(target: "auth", "cached token invalidated");
        }
        slot.last_outcome = None;
        slot.invalidated = true;
    }

    pub fn state(&self) -> TokenState {
        if self.refresh.try_lock().is_err() {
            return TokenState::Authenticating;
        }
        let now = self.clock.now();
        let slot = self.lock_slot();
        match &slot.token {
            Some(t) if t.is_usable(now, self.margin) => TokenState::Valid,
            Some(_) => TokenState::ExpiringSoon,
            None if slot.invalidated => TokenState::Invalidated,
            None => TokenState::Unauthenticated,
        }
    }
}
