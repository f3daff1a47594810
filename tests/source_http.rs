// Tests for the HTTP prayer-time lookup against a mock server.
use chrono::NaiveDate;
use mockito::{Matcher, Server};
use std::sync::Arc;
use std::time::Duration;
use waqt::PrayerError;
use waqt::model::{Prayer, School};
use waqt::orchestrator::RefreshOrchestrator;
use waqt::scheduler::TriggerScheduler;
use waqt::source::{AladhanClient, PrayerTimeSource, TimingsQuery};
use waqt::storage::{MemoryStore, StateStore};
use waqt::testing::{CountingLocation, FixedClock, RecordingNotifier};

const JAKARTA_BODY: &str = r#"{
    "code": 200,
    "status": "OK",
    "data": {
        "timings": {
            "Fajr": "04:31 (WIB)",
            "Sunrise": "05:44 (WIB)",
            "Dhuhr": "11:52 (WIB)",
            "Asr": "15:14 (WIB)",
            "Maghrib": "17:49 (WIB)",
            "Isha": "19:02 (WIB)",
            "Midnight": "23:52 (WIB)"
        },
        "date": { "gregorian": { "date": "14-03-2025" } },
        "meta": { "timezone": "Asia/Jakarta", "method": { "id": 20 } }
    }
}"#;

fn query() -> TimingsQuery {
    TimingsQuery {
        latitude: -6.2,
        longitude: 106.8,
        method: 20,
        school: School::Shafi,
        date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
    }
}

fn client(url: &str) -> AladhanClient {
    AladhanClient::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_times_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/timings/14-03-2025")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("latitude".into(), "-6.2".into()),
            Matcher::UrlEncoded("longitude".into(), "106.8".into()),
            Matcher::UrlEncoded("method".into(), "20".into()),
            Matcher::UrlEncoded("school".into(), "0".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JAKARTA_BODY)
        .expect(1)
        .create_async()
        .await;

    let timings = client(&server.url()).fetch_times(&query()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(timings.timezone, "Asia/Jakarta");
    assert_eq!(timings.times.get(Prayer::Maghrib).to_string(), "17:49");
}

#[tokio::test]
async fn test_http_error_is_source_unavailable() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(500)
        .with_body("upstream down")
        .create_async()
        .await;

    let err = client(&server.url()).fetch_times(&query()).await.unwrap_err();
    assert!(matches!(err, PrayerError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_truncated_body_is_invalid() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body(r#"{"code":200,"status":"OK","data":{"meta":{"timezone":"Asia/Jakarta"}}}"#)
        .create_async()
        .await;

    let err = client(&server.url()).fetch_times(&query()).await.unwrap_err();
    assert!(matches!(err, PrayerError::SourceDataInvalid(_)));
}

#[tokio::test]
async fn test_unreachable_host_is_source_unavailable() {
    // Nothing listens on port 9 locally.
    let err = client("http://127.0.0.1:9")
        .fetch_times(&query())
        .await
        .unwrap_err();
    assert!(matches!(err, PrayerError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_application_error_aborts_refresh_without_side_effects() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body(r#"{"code":400,"status":"BAD_REQUEST","data":"Invalid date"}"#)
        .create_async()
        .await;

    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(FixedClock::at("2025-03-14T09:00:00+07:00"));
    let store = StateStore::new(Arc::new(MemoryStore::new()));
    let orchestrator = RefreshOrchestrator::new(
        Arc::new(CountingLocation::at(-6.2, 106.8)),
        Arc::new(client(&server.url())),
        store.clone(),
        Arc::new(TriggerScheduler::new(
            notifier.clone(),
            clock.clone(),
            Duration::ZERO,
            600,
        )),
        clock,
    );

    let err = orchestrator.refresh(20, School::Shafi).await.unwrap_err();

    assert!(matches!(err, PrayerError::SourceUnavailable(_)));
    assert_eq!(store.load().await.unwrap(), None);
    assert_eq!(notifier.cancel_calls(), 0);
    assert!(notifier.installed().is_empty());
}
