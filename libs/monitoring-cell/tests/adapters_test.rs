// =====================================================================================
// HTTP ADAPTER TESTS
// =====================================================================================

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use monitoring_cell::adapters::{HttpShiftDetector, WebhookNotificationSender};
use monitoring_cell::{NotificationSender, ShiftDetector};
use shared_models::{Alert, AlertPriority, DetectOptions, DetectorError, NotificationError};

fn options(limit: usize) -> DetectOptions {
    DetectOptions {
        limit,
        lookback: Duration::from_secs(24 * 3600),
    }
}

fn candidate(a: &str, b: &str, correlation: f64) -> serde_json::Value {
    json!({
        "factor_a": a,
        "factor_b": b,
        "current_correlation": correlation,
        "previous_correlation": 0.1,
        "league": "NBA",
        "sample_size": 120,
        "detected_at": "2026-10-01T12:00:00Z"
    })
}

#[tokio::test]
async fn test_detector_reads_bare_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifts"))
        .and(query_param("limit", "10"))
        .and(query_param("lookback_hours", "24"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            candidate("pace", "total_points", 0.82),
            candidate("rest_days", "spread", -0.64),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let detector = HttpShiftDetector::new(server.uri(), Duration::from_secs(2)).unwrap();
    let candidates = detector.detect(options(10)).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].factor_a, "pace");
    assert_eq!(candidates[1].current_correlation, -0.64);
    assert_eq!(candidates[0].league.as_deref(), Some("NBA"));
    assert_eq!(candidates[0].sample_size, Some(120));
}

#[tokio::test]
async fn test_detector_reads_wrapped_list_and_truncates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [
                candidate("a", "b", 0.7),
                candidate("c", "d", 0.8),
                candidate("e", "f", 0.9),
            ]
        })))
        .mount(&server)
        .await;

    let detector = HttpShiftDetector::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap();
    let candidates = detector.detect(options(2)).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[1].factor_a, "c");
}

#[tokio::test]
async fn test_detector_maps_server_error_to_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifts"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .mount(&server)
        .await;

    let detector = HttpShiftDetector::new(server.uri(), Duration::from_secs(2)).unwrap();

    assert_matches!(detector.detect(options(10)).await, Err(DetectorError::Unavailable(_)));
}

#[tokio::test]
async fn test_detector_rejects_malformed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "shifts": "none" })))
        .mount(&server)
        .await;

    let detector = HttpShiftDetector::new(server.uri(), Duration::from_secs(2)).unwrap();

    assert_matches!(detector.detect(options(10)).await, Err(DetectorError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_detector_times_out_slow_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let detector = HttpShiftDetector::new(server.uri(), Duration::from_millis(100)).unwrap();

    assert_matches!(detector.detect(options(10)).await, Err(DetectorError::Unavailable(_)));
}

#[tokio::test]
async fn test_webhook_posts_recipient_and_alert() {
    let server = MockServer::start().await;
    let alert = Alert::system(AlertPriority::High, "Monitoring cycle failed", "detector down");

    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(body_partial_json(json!({
            "recipient": "user-1",
            "alert": { "title": "Monitoring cycle failed" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sender =
        WebhookNotificationSender::new(format!("{}/hooks/alerts", server.uri()), Duration::from_secs(2)).unwrap();

    assert_eq!(sender.channel(), "webhook");
    sender.send(&alert, "user-1").await.unwrap();
}

#[tokio::test]
async fn test_webhook_rejection_carries_alert_id() {
    let server = MockServer::start().await;
    let alert = Alert::system(AlertPriority::Low, "Throttle adjusted", "admission at 40%");

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown recipient"))
        .mount(&server)
        .await;

    let sender = WebhookNotificationSender::new(server.uri(), Duration::from_secs(2)).unwrap();
    let result = sender.send(&alert, "ghost").await;

    assert_matches!(result, Err(NotificationError::Rejected { alert_id, .. }) if alert_id == alert.id.to_string());
}

#[tokio::test]
async fn test_webhook_unreachable_endpoint() {
    let sender = WebhookNotificationSender::new("http://127.0.0.1:9/alerts", Duration::from_millis(200)).unwrap();
    let alert = Alert::system(AlertPriority::Low, "t", "m");

    assert_matches!(sender.send(&alert, "user-1").await, Err(NotificationError::Unreachable(_)));
}
