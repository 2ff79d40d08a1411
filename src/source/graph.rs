// src/source/graph.rs
//! Microsoft Graph calendar wire format and transport.
//!
//! Calls `GET {base}/me/calendarView` (or `/users/{id}/calendarView` for
//! application permissions) with `Prefer: outlook.timezone="UTC"`, so
//! `dateTime` values without an offset are read as UTC.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{header, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::model::{normalize_tags, Item};
use crate::redact::anon_hash;
use crate::retry::CallError;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Largest `$top` Graph accepts.
pub const MAX_TOP: u32 = 999;
const MAX_TAGS: usize = 5;

pub fn token_url(authority: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub user_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub top: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDateTime {
    #[serde(default)]
    pub date_time: String,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLocation {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphBody {
    #[serde(default)]
    pub content: Option<String>,
}

/// The subset of a Graph `event` resource we read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteEvent {
    pub id: String,
    pub subject: Option<String>,
    pub start: Option<GraphDateTime>,
    pub end: Option<GraphDateTime>,
    pub location: Option<GraphLocation>,
    pub categories: Option<Vec<String>>,
    pub is_cancelled: bool,
    pub is_online_meeting: bool,
    pub is_reminder_on: bool,
    pub attendees: Option<Vec<serde_json::Value>>,
    pub body_preview: Option<String>,
    pub body: Option<GraphBody>,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    value: Vec<RemoteEvent>,
}

#[async_trait]
pub trait CalendarTransport: Send + Sync {
    async fn list_events(&self, token: &str, query: &EventQuery)
        -> Result<Vec<RemoteEvent>, CallError>;
}

#[derive(Debug, Clone)]
pub struct GraphTransport {
    http: reqwest::Client,
    base_url: String,
}

impl GraphTransport {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `user_id` is percent-encoded as a single path segment.
    fn events_url(&self, user_id: Option<&str>) -> Result<Url, CallError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| CallError::Network(Box::new(e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| CallError::Network("base URL cannot carry a path".into()))?;
            segments.pop_if_empty();
            match user_id {
                Some(id) => segments.extend(["users", id, "calendarView"]),
                None => segments.extend(["me", "calendarView"]),
            };
        }
        Ok(url)
    }
}

#[async_trait]
impl CalendarTransport for GraphTransport {
    async fn list_events(
        &self,
        token: &str,
        query: &EventQuery,
    ) -> Result<Vec<RemoteEvent>, CallError> {
        let url = self.events_url(query.user_id.as_deref())?;
        let params = [
            (
                "startDateTime",
                query.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "endDateTime",
                query.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("$top", query.top.min(MAX_TOP).to_string()),
            ("$orderby", "start/dateTime".to_string()),
        ];

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(CallError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(CallError::Unauthorized);
        }
        if !status.is_success() {
            return Err(CallError::Status(status.as_u16()));
        }

        let page: EventPage = resp
            .json()
            .await
            .map_err(|e| CallError::Malformed(Box::new(e.without_url())))?;
        debug!(target: "source", count = page.value.len(), "graph page received");
        Ok(page.value)
    }
}

fn classify_transport(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Network(Box::new(e.without_url()))
    }
}

/// Graph `dateTime`: RFC 3339 when it carries an offset, otherwise a naive
/// timestamp in the zone we asked for (UTC).
pub fn parse_graph_datetime(dt: &GraphDateTime) -> Option<DateTime<Utc>> {
    let raw = dt.date_time.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn extract_tags(ev: &RemoteEvent) -> Vec<String> {
    let mut raw: Vec<&str> = ev
        .categories
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    if ev.is_online_meeting {
        raw.push("online");
    }
    if ev.is_reminder_on {
        raw.push("reminder");
    }

    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || out.contains(&tag) {
            continue;
        }
        out.push(tag);
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Heuristic in `[0, 1]` from description, attendees, location and online
/// flag. No signal at all means 0, not the base score.
pub fn popularity(ev: &RemoteEvent) -> f64 {
    let has_description = ev.body_preview.as_deref().is_some_and(|s| !s.is_empty())
        || ev
            .body
            .as_ref()
            .and_then(|b| b.content.as_deref())
            .is_some_and(|s| !s.is_empty());
    let attendees = ev.attendees.as_ref().map_or(0, Vec::len);
    let has_location = location_name(ev).is_some();

    if !has_description && attendees == 0 && !has_location && !ev.is_online_meeting {
        return 0.0;
    }

    let mut score = 0.25;
    if has_description {
        score += 0.1;
    }
    if attendees > 0 {
        score += (attendees as f64 * 0.05).min(0.3);
    }
    if has_location {
        score += 0.2;
    }
    if ev.is_online_meeting {
        score += 0.1;
    }
    f64::min(score, 1.0)
}

fn location_name(ev: &RemoteEvent) -> Option<&str> {
    ev.location
        .as_ref()
        .and_then(|l| l.display_name.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Maps one Graph event onto an [`Item`]. Cancelled events and events whose
/// times don't parse are skipped.
pub fn to_item(ev: &RemoteEvent) -> Option<Item> {
    if ev.is_cancelled {
        return None;
    }
    let start = ev.start.as_ref().and_then(parse_graph_datetime)?;
    let end = ev.end.as_ref().and_then(parse_graph_datetime)?;

    let title = ev
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled Event")
        .to_string();
    let id = if ev.id.is_empty() {
        anon_hash(&format!("{title}|{}|{}", start.timestamp(), end.timestamp()))
    } else {
        ev.id.clone()
    };

    Some(Item {
        id,
        title,
        start: start.timestamp(),
        end: end.timestamp(),
        location: location_name(ev).map(str::to_string),
        tags: normalize_tags(extract_tags(ev)),
        popularity: popularity(ev),
    })
}
