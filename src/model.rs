use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// A session or calendar event as produced by a [`crate::source::DataSource`].
///
/// `start`/`end` are comparable ordinals: unix seconds for remote events,
/// whatever the catalog loader chose for static sessions. Only equality and
/// ordering are ever used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub start: i64,
    pub end: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "de_tags")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub popularity: f64,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start,
            end,
            location: None,
            tags: BTreeSet::new(),
            popularity: 0.0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_popularity(mut self, popularity: f64) -> Self {
        self.popularity = popularity;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Lowercases tags and clamps popularity into the non-negative range.
    /// Sources call this before handing items out.
    pub fn normalized(mut self) -> Self {
        let tags = std::mem::take(&mut self.tags);
        self.tags = normalize_tags(tags);
        if !self.popularity.is_finite() || self.popularity < 0.0 {
            self.popularity = 0.0;
        }
        self
    }

    pub fn slot(&self) -> (i64, i64) {
        (self.start, self.end)
    }
}

pub(crate) fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn de_tags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_tags(raw))
}

/// Per-item score contributions. `total` is always the exact sum of the three
/// parts; the only way to build one is [`ScoreBreakdown::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    interest_match: f64,
    popularity: f64,
    diversity: f64,
    total: f64,
}

impl ScoreBreakdown {
    pub fn new(interest_match: f64, popularity: f64, diversity: f64) -> Self {
        Self {
            interest_match,
            popularity,
            diversity,
            total: interest_match + popularity + diversity,
        }
    }

    pub fn interest_match(&self) -> f64 {
        self.interest_match
    }

    pub fn popularity(&self) -> f64 {
        self.popularity
    }

    pub fn diversity(&self) -> f64 {
        self.diversity
    }

    pub fn total(&self) -> f64 {
        self.total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item: Item,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationResult {
    pub items: Vec<ScoredItem>,
    pub conflict_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub id: String,
    pub title: String,
    pub breakdown: ScoreBreakdown,
    pub matched_tags: Vec<String>,
}
