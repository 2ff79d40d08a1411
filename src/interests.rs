//! Normalization of raw user interest strings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ValidationError;

pub const DEFAULT_MAX_INTERESTS: usize = 20;
pub const MAX_RAW_LEN: usize = 500;

static ALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\p{N}\s,;\-]*$").expect("static interest regex must compile")
});

/// Distinct lowercase interests in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterestSet(Vec<String>);

impl InterestSet {
    /// Splits `raw` on `,` and `;`, trims, lowercases and de-duplicates.
    ///
    /// An empty result is valid here (scoring handles it); callers that need
    /// at least one interest check [`InterestSet::is_empty`] themselves.
    pub fn parse(raw: &str, max: usize) -> Result<Self, ValidationError> {
        let len = raw.chars().count();
        if len > MAX_RAW_LEN {
            return Err(ValidationError::InterestsTooLong {
                len,
                max: MAX_RAW_LEN,
            });
        }
        if !ALLOWED.is_match(raw) {
            return Err(ValidationError::InvalidCharacters);
        }

        let mut out: Vec<String> = Vec::new();
        for term in raw.split([',', ';']) {
            let term = term.trim().to_lowercase();
            if term.is_empty() || out.contains(&term) {
                continue;
            }
            out.push(term);
        }

        if out.len() > max {
            return Err(ValidationError::TooManyInterests {
                count: out.len(),
                max,
            });
        }
        Ok(Self(out))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|i| i == tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-joined form, suitable for storing back into a profile.
    pub fn to_raw(&self) -> String {
        self.0.join(", ")
    }
}
