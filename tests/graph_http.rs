// tests/graph_http.rs
// Token exchange and calendar transport against a local mock HTTP server.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, TimeZone, Utc};
use mockito::{Matcher, Server};

use event_recommender::auth::{ClientCredentialsExchange, TokenExchange, TokenProvider, TokenState};
use event_recommender::cache::ResponseCache;
use event_recommender::clock::ManualClock;
use event_recommender::error::{AuthError, SourceError, UnavailableReason};
use event_recommender::retry::{CallError, RetryPolicy};
use event_recommender::source::graph::{token_url, CalendarTransport, EventQuery, GraphTransport};
use event_recommender::source::{DataSource, RemoteCalendarSource, RemoteSourceConfig};

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

fn exchange(server: &Server) -> ClientCredentialsExchange {
    ClientCredentialsExchange::new(
        reqwest::Client::new(),
        token_url(&server.url(), "tenant-1"),
        "client-1",
        "very-secret",
        "https://graph.microsoft.com/.default",
    )
    .unwrap()
}

fn query() -> EventQuery {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    EventQuery {
        user_id: None,
        start,
        end: start + TimeDelta::days(7),
        top: 10,
    }
}

const PAGE: &str = r#"{
  "value": [
    {
      "id": "ev-1",
      "subject": "Design review",
      "start": {"dateTime": "2024-05-01T09:00:00.0000000", "timeZone": "UTC"},
      "end": {"dateTime": "2024-05-01T10:00:00.0000000", "timeZone": "UTC"},
      "location": {"displayName": "Room 4"},
      "categories": ["Design", "design", "Review"],
      "isOnlineMeeting": true,
      "attendees": [{}, {}]
    },
    {
      "id": "ev-2",
      "subject": "Cancelled sync",
      "isCancelled": true,
      "start": {"dateTime": "2024-05-01T11:00:00"},
      "end": {"dateTime": "2024-05-01T12:00:00"}
    }
  ]
}"#;

#[tokio::test]
async fn exchange_posts_client_credentials_form() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            Matcher::UrlEncoded("client_secret".into(), "very-secret".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok-1","expires_in":"3599","token_type":"Bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let issued = exchange(&server).exchange().await.unwrap();
    assert_eq!(issued.access_token, "tok-1");
    assert_eq!(issued.expires_in, TimeDelta::seconds(3599));
    m.assert_async().await;
}

#[tokio::test]
async fn exchange_reports_authority_error_code_without_secret() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_client","error_description":"AADSTS7000215"}"#)
        .create_async()
        .await;

    let err = exchange(&server).exchange().await.unwrap_err();
    assert_eq!(
        err,
        AuthError::Rejected {
            code: "invalid_client".into()
        }
    );
    assert!(!err.is_refreshable());
    assert!(!err.to_string().contains("very-secret"));
}

#[tokio::test]
async fn exchange_rejects_non_json_success_body() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_body("<html>welcome</html>")
        .create_async()
        .await;

    let err = exchange(&server).exchange().await.unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse { .. }));
}

#[tokio::test]
async fn exchange_treats_html_outage_page_as_refreshable() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .with_status(503)
        .with_body("<html>service unavailable</html>")
        .create_async()
        .await;

    let err = exchange(&server).exchange().await.unwrap_err();
    assert_eq!(
        err,
        AuthError::Exchange {
            reason: "HTTP 503".into()
        }
    );
    assert!(err.is_refreshable());
}

#[tokio::test]
async fn huge_expires_in_is_malformed_and_leaves_provider_usable() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok","expires_in":10000000000000}"#)
        .create_async()
        .await;

    let provider = Arc::new(TokenProvider::new(Arc::new(exchange(&server))));
    let p = provider.clone();
    let joined = tokio::spawn(async move { p.get_token().await }).await;
    let err = joined.expect("get_token must not panic").unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse { .. }));
    assert_eq!(provider.state(), TokenState::Unauthenticated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_lived_token_is_fetched_once_for_concurrent_callers() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"brief","expires_in":120}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = Arc::new(TokenProvider::new(Arc::new(exchange(&server))));
    let mut set = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let p = provider.clone();
        set.spawn(async move { p.get_token().await });
    }
    while let Some(r) = set.join_next().await {
        assert_eq!(r.unwrap().unwrap(), "brief");
    }
    m.assert_async().await;
}

#[tokio::test]
async fn transport_sends_window_and_bearer() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("GET", "/me/calendarView")
        .match_header("authorization", "Bearer tok-1")
        .match_header("prefer", "outlook.timezone=\"UTC\"")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("startDateTime".into(), "2024-05-01T08:00:00Z".into()),
            Matcher::UrlEncoded("endDateTime".into(), "2024-05-08T08:00:00Z".into()),
            Matcher::UrlEncoded("$top".into(), "10".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PAGE)
        .create_async()
        .await;

    let transport = GraphTransport::new(reqwest::Client::new(), server.url());
    let events = transport.list_events("tok-1", &query()).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject.as_deref(), Some("Design review"));
    m.assert_async().await;
}

async fn status_case(path: &str, status: usize, retry_after: Option<&str>) -> CallError {
    let mut server = Server::new_async().await;
    let mut mock = server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_status(status);
    if let Some(v) = retry_after {
        mock = mock.with_header("retry-after", v);
    }
    let _mock = mock.create_async().await;

    let transport = GraphTransport::new(reqwest::Client::new(), server.url());
    let mut q = query();
    if path.starts_with("/users/") {
        q.user_id = Some("someone".into());
    }
    transport.list_events("t", &q).await.unwrap_err()
}

#[tokio::test]
async fn transport_classifies_status_codes() {
    let err = status_case("/me/calendarView", 429, Some("7")).await;
    assert!(matches!(
        err,
        CallError::RateLimited {
            retry_after: Some(d)
        } if d == Duration::from_secs(7)
    ));

    let err = status_case("/me/calendarView", 429, None).await;
    assert!(matches!(err, CallError::RateLimited { retry_after: None }));

    let err = status_case("/me/calendarView", 401, None).await;
    assert!(matches!(err, CallError::Unauthorized));

    let err = status_case("/users/someone/calendarView", 503, None).await;
    assert!(matches!(err, CallError::Status(503)));
}

fn remote_source(server: &Server, clock: Arc<ManualClock>) -> RemoteCalendarSource {
    let tokens = TokenProvider::new(Arc::new(exchange(server))).with_clock(clock.clone());
    let transport = GraphTransport::new(reqwest::Client::new(), server.url());
    RemoteCalendarSource::new(
        Arc::new(tokens),
        Arc::new(ResponseCache::new(clock.clone())),
        Arc::new(transport),
        RemoteSourceConfig::default(),
    )
    .with_retry(RetryPolicy::immediate(3, 1))
    .with_clock(clock)
}

#[tokio::test]
async fn remote_source_end_to_end_uses_token_and_cache() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let events = server
        .mock("GET", "/me/calendarView")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PAGE)
        .expect(1)
        .create_async()
        .await;

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
    ));
    let src = remote_source(&server, clock);

    let items = src.fetch().await.unwrap();
    assert_eq!(items.len(), 1, "cancelled event is skipped");
    let item = &items[0];
    assert_eq!(item.id, "ev-1");
    assert_eq!(item.location.as_deref(), Some("Room 4"));
    assert_eq!(
        item.tags.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["design", "online", "review"]
    );
    assert_eq!(item.end - item.start, 3600);
    assert!(item.popularity > 0.0 && item.popularity <= 1.0);

    // Served from cache: no second token exchange or calendar call.
    let again = src.fetch().await.unwrap();
    assert_eq!(again.len(), 1);

    token.assert_async().await;
    events.assert_async().await;
}

#[tokio::test]
async fn remote_source_gives_up_after_repeated_throttling() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
        .create_async()
        .await;
    let throttled = server
        .mock("GET", "/me/calendarView")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(3)
        .create_async()
        .await;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let err = remote_source(&server, clock).fetch().await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::Unavailable {
            reason: UnavailableReason::RateLimited,
            ..
        }
    ));
    throttled.assert_async().await;
}
