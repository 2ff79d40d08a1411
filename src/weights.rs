//! # Scoring weights
//!
//! Named weights for the three score contributions. Every field has a
//! documented default, so a partial file (or none at all) still yields a
//! complete config.
//!
//! JSON/TOML shape:
//! ```text
//! { "interest": 2.0, "popularity": 0.5, "diversity": 0.3 }
//! ```
//!
//! No weight may be negative. [`WeightConfig::validated`] clamps bad values to
//! zero with a warning (used at load time); [`WeightConfig::strict`] rejects
//! them instead.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default = "default_interest")]
    pub interest: f64,
    #[serde(default = "default_popularity")]
    pub popularity: f64,
    #[serde(default = "default_diversity")]
    pub diversity: f64,
}

fn default_interest() -> f64 {
    2.0
}
fn default_popularity() -> f64 {
    0.5
}
fn default_diversity() -> f64 {
    0.3
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            interest: default_interest(),
            popularity: default_popularity(),
            diversity: default_diversity(),
        }
    }
}

impl WeightConfig {
    pub fn new(interest: f64, popularity: f64, diversity: f64) -> Self {
        Self {
            interest,
            popularity,
            diversity,
        }
    }

    fn fields(&self) -> [(&'static str, f64); 3] {
        [
            ("interest", self.interest),
            ("popularity", self.popularity),
            ("diversity", self.diversity),
        ]
    }

    /// Clamp negative or non-finite weights to 0.
    pub fn validated(self) -> Self {
        for (field, value) in self.fields() {
            if !is_valid(value) {
                warn!(target: "recommender", field, value, "invalid weight clamped to 0");
            }
        }
        Self {
            interest: clamp_weight(self.interest),
            popularity: clamp_weight(self.popularity),
            diversity: clamp_weight(self.diversity),
        }
    }

    /// Reject negative or non-finite weights.
    pub fn strict(self) -> Result<Self, ValidationError> {
        for (field, value) in self.fields() {
            if !is_valid(value) {
                return Err(ValidationError::InvalidWeight { field, value });
            }
        }
        Ok(self)
    }

    /// Load from a `.json` or `.toml` file; the result is always validated.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading weights from {}", path.display()))?;
        let parsed: WeightConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw)
                .with_context(|| format!("parsing TOML weights {}", path.display()))?,
            _ => serde_json::from_str(&raw)
                .with_context(|| format!("parsing JSON weights {}", path.display()))?,
        };
        Ok(parsed.validated())
    }

    /// Like [`WeightConfig::load_from_file`] but falls back to `fallback` on
    /// any read or parse error.
    pub fn load_or<P: AsRef<Path>>(path: P, fallback: WeightConfig) -> Self {
        match Self::load_from_file(path.as_ref()) {
            Ok(w) => w,
            Err(e) => {
                warn!(target: "recommender", error = %e, "weights file unusable; using fallback");
                fallback.validated()
            }
        }
    }
}

fn is_valid(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}

fn clamp_weight(x: f64) -> f64 {
    if is_valid(x) {
        x
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let w = WeightConfig::default();
        assert!((w.interest - 2.0).abs() < 1e-9);
        assert!((w.popularity - 0.5).abs() < 1e-9);
        assert!((w.diversity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn partial_json_fills_missing_fields() {
        let w: WeightConfig = serde_json::from_str(r#"{"interest": 3.0}"#).unwrap();
        assert_eq!(w, WeightConfig::new(3.0, 0.5, 0.3));
    }

    #[test]
    fn validated_clamps_negative_and_nan() {
        let w = WeightConfig::new(-1.0, f64::NAN, 0.3).validated();
        assert_eq!(w, WeightConfig::new(0.0, 0.0, 0.3));
    }

    #[test]
    fn strict_rejects_negative() {
        let err = WeightConfig::new(2.0, -0.5, 0.3).strict().unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidWeight {
                field: "popularity",
                value: -0.5
            }
        );
        assert!(WeightConfig::default().strict().is_ok());
    }

    #[test]
    fn loads_toml_and_json_files() {
        let mut t = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(t, "interest = 1.5\ndiversity = -2.0").unwrap();
        let w = WeightConfig::load_from_file(t.path()).unwrap();
        assert_eq!(w, WeightConfig::new(1.5, 0.5, 0.0));

        let mut j = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(j, r#"{{"popularity": 1.0}}"#).unwrap();
        let w = WeightConfig::load_from_file(j.path()).unwrap();
        assert_eq!(w, WeightConfig::new(2.0, 1.0, 0.3));
    }

    #[test]
    fn load_or_falls_back_on_missing_file() {
        let w = WeightConfig::load_or("definitely/not/here.json", WeightConfig::default());
        assert_eq!(w, WeightConfig::default());
    }
}
