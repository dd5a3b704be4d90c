//! Tests for the health and metrics endpoints.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn get(uri: &str) -> (StatusCode, String, Vec<u8>) {
    let app = worker::create_app(get_metrics_handle());
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn test_health_check() {
    let (status, _, body) = get("/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_exposes_queue_counters() {
    // The recorder must exist before the counter is touched.
    get_metrics_handle();
    metrics::counter!("payment_queue_messages_total", "outcome" => "completed").increment(1);

    let (status, content_type, body) = get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/plain"));
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("payment_queue_messages_total"));
}

#[tokio::test]
async fn test_unknown_route() {
    let (status, _, _) = get("/orders").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
