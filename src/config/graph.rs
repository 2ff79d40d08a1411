// src/config/graph.rs
use std::{env, fmt};

use crate::error::AuthError;

pub const ENV_TENANT_ID: &str = "GRAPH_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "GRAPH_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "GRAPH_CLIENT_SECRET";
pub const ENV_USER_ID: &str = "GRAPH_USER_ID";
pub const ENV_ENABLED: &str = "GRAPH_ENABLED";

/// Remote calendar credentials, read from the environment (after `.env`).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GraphSettings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_id: Option<String>,
    pub enabled: bool,
}

impl fmt::Debug for GraphSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("user_id", &self.user_id.as_ref().map(|u| crate::redact::anon_hash(u)))
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl GraphSettings {
    pub fn from_env() -> Self {
        Self {
            tenant_id: non_empty(ENV_TENANT_ID),
            client_id: non_empty(ENV_CLIENT_ID),
            client_secret: non_empty(ENV_CLIENT_SECRET),
            user_id: non_empty(ENV_USER_ID),
            enabled: env::var(ENV_ENABLED).map(|v| truthy(&v)).unwrap_or(false),
        }
    }

    /// Names of the required variables that are missing.
    pub fn validation_errors(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.tenant_id.is_none() {
            missing.push(ENV_TENANT_ID);
        }
        if self.client_id.is_none() {
            missing.push(ENV_CLIENT_ID);
        }
        if self.client_secret.is_none() {
            missing.push(ENV_CLIENT_SECRET);
        }
        missing
    }

    pub fn is_ready(&self) -> bool {
        self.validation_errors().is_empty()
    }

    /// `(tenant, client_id, client_secret)` or the list of what's missing.
    pub fn credentials(&self) -> Result<(&str, &str, &str), AuthError> {
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(t), Some(c), Some(s)) => Ok((t, c, s)),
            _ => Err(AuthError::MissingCredentials {
                missing: self.validation_errors(),
            }),
        }
    }
}
