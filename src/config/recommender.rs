// src/config/recommender.rs
use serde::Deserialize;
use std::{env, fs, io, path::PathBuf, time::Duration};
use tracing::info;

use anyhow::Context;

use crate::retry::RetryPolicy;
use crate::source::graph::{AUTHORITY_URL, GRAPH_BASE_URL, MAX_TOP};
use crate::source::RemoteSourceConfig;
use crate::weights::WeightConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/recommender.toml";
pub const ENV_CONFIG_PATH: &str = "RECOMMENDER_CONFIG_PATH";
pub const ENV_WEIGHTS_PATH: &str = "RECOMMENDER_WEIGHTS_PATH";

/// Top-level TOML document. Every section is optional.
///
/// ```toml
/// [weights]
/// interest = 2.0
///
/// [limits]
/// default_top_n = 5
///
/// [remote]
/// cache_ttl_secs = 300
///
/// [retry]
/// max_attempts = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    pub weights: WeightConfig,
    pub limits: LimitsConfig,
    pub remote: RemoteConfig,
    pub retry: RetryPolicy,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_interests: usize,
    pub default_top_n: i64,
    /// Upper bound the HTTP surface accepts for `top`.
    pub max_top_n: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_interests: crate::interests::DEFAULT_MAX_INTERESTS,
            default_top_n: 5,
            max_top_n: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub authority_url: String,
    pub window_days: i64,
    pub max_events: u32,
    pub cache_ttl_secs: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub token_timeout_ms: u64,
    /// Owner-only token cache; unset keeps tokens in memory only.
    pub token_cache_path: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: GRAPH_BASE_URL.to_string(),
            authority_url: AUTHORITY_URL.to_string(),
            window_days: 7,
            max_events: 50,
            cache_ttl_secs: 300,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 4_000,
            token_timeout_ms: 10_000,
            token_cache_path: None,
        }
    }
}

impl RemoteConfig {
    pub fn source_config(&self, user_id: Option<String>) -> RemoteSourceConfig {
        RemoteSourceConfig {
            user_id,
            window_days: self.window_days,
            max_events: self.max_events,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub manifest: PathBuf,
    pub profiles: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("config/agent.json"),
            profiles: None,
        }
    }
}

impl RecommenderConfig {
    /// Reads `$RECOMMENDER_CONFIG_PATH` (or `config/recommender.toml`).
    /// A missing file yields defaults; a broken one is an error.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut cfg = match fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(target: "recommender", path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        if let Ok(wpath) = env::var(ENV_WEIGHTS_PATH) {
            cfg.weights = WeightConfig::load_or(&wpath, cfg.weights);
        }
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: RecommenderConfig = toml::from_str(raw)?;
        Ok(cfg.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.weights = self.weights.validated();
        self.limits.max_interests = self.limits.max_interests.max(1);
        self.limits.max_top_n = self.limits.max_top_n.max(1);
        self.limits.default_top_n = self.limits.default_top_n.clamp(1, self.limits.max_top_n);
        self.remote.window_days = self.remote.window_days.clamp(1, 366);
        self.remote.max_events = self.remote.max_events.clamp(1, MAX_TOP);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.remote.token_timeout_ms = self.remote.token_timeout_ms.max(1);
        // Each attempt may include a token exchange; it must fit inside.
        self.retry.attempt_timeout = self
            .retry
            .attempt_timeout
            .max(Duration::from_millis(self.remote.token_timeout_ms));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = RecommenderConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.weights, WeightConfig::default());
        assert_eq!(cfg.limits.default_top_n, 5);
        assert_eq!(cfg.remote.base_url, GRAPH_BASE_URL);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn attempt_timeout_never_undercuts_token_timeout() {
        let cfg = RecommenderConfig::from_toml_str(
            r#"
            [remote]
            token_timeout_ms = 8000

            [retry]
            attempt_timeout_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retry.attempt_timeout, Duration::from_secs(8));

        let cfg = RecommenderConfig::from_toml_str("[retry]\nattempt_timeout_ms = 45000\n").unwrap();
        assert_eq!(cfg.retry.attempt_timeout, Duration::from_secs(45));
    }

    #[test]
    fn partial_sections_and_sanitizing() {
        let cfg = RecommenderConfig::from_toml_str(
            r#"
            [weights]
            popularity = -1.0

            [limits]
            default_top_n = 500
            max_top_n = 20

            [remote]
            max_events = 5000
            token_cache_path = "/tmp/tok.json"

            [retry]
            max_attempts = 0
            base_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.weights.popularity, 0.0);
        assert_eq!(cfg.weights.interest, 2.0);
        assert_eq!(cfg.limits.default_top_n, 20);
        assert_eq!(cfg.remote.max_events, MAX_TOP);
        assert_eq!(cfg.remote.token_cache_path, Some(PathBuf::from("/tmp/tok.json")));
        assert_eq!(cfg.retry.max_attempts, 1);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(250));
        assert_eq!(cfg.retry.max_delay, RetryPolicy::default().max_delay);
    }

    #[test]
    fn unknown_types_are_errors() {
        assert!(RecommenderConfig::from_toml_str("[limits]\ndefault_top_n = \"five\"").is_err());
    }

    #[test]
    #[serial]
    fn load_reads_env_paths() {
        let mut cfg = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(cfg, "[limits]\nmax_interests = 3").unwrap();
        let mut w = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(w, r#"{{"interest": 9.0}}"#).unwrap();

        env::set_var(ENV_CONFIG_PATH, cfg.path());
        env::set_var(ENV_WEIGHTS_PATH, w.path());
        let loaded = RecommenderConfig::load().unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_WEIGHTS_PATH);

        assert_eq!(loaded.limits.max_interests, 3);
        assert_eq!(loaded.weights.interest, 9.0);
    }

    #[test]
    #[serial]
    fn load_without_file_uses_defaults() {
        env::set_var(ENV_CONFIG_PATH, "does/not/exist.toml");
        let loaded = RecommenderConfig::load().unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        assert_eq!(loaded.limits.max_interests, 20);
    }
}
