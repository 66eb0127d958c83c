//! Integration tests for the analyzer HTTP endpoints

use analyzer_lib::{
    exporter::{create_router, AppState, SignalRegistry},
    health::{components, HealthRegistry},
    AnalyzerMetrics, DerivedSignal, SignalKind,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use prometheus::Registry;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    signals: SignalRegistry,
    metrics: AnalyzerMetrics,
}

async fn setup_test_app() -> TestApp {
    let registry = Registry::new();
    let signals = SignalRegistry::new(registry.clone()).unwrap();
    let metrics = AnalyzerMetrics::new(&registry).unwrap();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::FORECASTER).await;
    health_registry.register(components::EXPORTER).await;

    let state = Arc::new(AppState::new(health_registry, registry));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        signals,
        metrics,
    }
}

async fn get(router: Router, uri: &str) -> (StatusCode, String, Option<String>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, String::from_utf8(body.to_vec()).unwrap(), content_type)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, body, _) = get(app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["source"].is_object());
    assert!(health["components"]["forecaster"].is_object());
    assert!(health["components"]["exporter"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .record_cycle(components::FORECASTER, 4, 1)
        .await;

    let (status, body, _) = get(app.router, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["forecaster"]["message"],
        "1 of 4 requests failed in last cycle"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .record_cycle(components::SOURCE, 4, 4)
        .await;

    let (status, body, _) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_until_ready() {
    let app = setup_test_app().await;

    let (status, body, _) = get(app.router.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;

    let (status, body, _) = get(app.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_published_signals() {
    let app = setup_test_app().await;
    app.signals.publish_all(&[
        DerivedSignal::new("latency", SignalKind::Deviation, 10.0),
        DerivedSignal::new("latency", SignalKind::Anomaly, 1.0),
    ]);
    app.metrics.inc_analysis_requests();

    let (status, body, content_type) = get(app.router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert!(body.contains("timegpt_deviation{metric=\"latency\"} 10"));
    assert!(body.contains("timegpt_anomaly{metric=\"latency\"} 1"));
    assert!(body.contains("timegpt_analysis_requests_total 1"));
}

#[tokio::test]
async fn test_metrics_endpoint_omits_unpublished_metrics() {
    let app = setup_test_app().await;
    app.signals
        .publish(&DerivedSignal::new("latency", SignalKind::Forecast, 0.25));

    let (_, body, _) = get(app.router, "/metrics").await;

    assert!(body.contains("timegpt_forecast{metric=\"latency\"} 0.25"));
    assert!(!body.contains("metric=\"heap_usage\""));
}

#[tokio::test]
async fn test_metrics_endpoint_contains_histogram_series() {
    let app = setup_test_app().await;
    app.metrics.observe_cycle_duration(0.4);
    app.metrics.observe_forecast_latency(1.2);

    let (_, body, _) = get(app.router, "/metrics").await;

    assert!(body.contains("timegpt_cycle_duration_seconds_bucket"));
    assert!(body.contains("timegpt_cycle_duration_seconds_count 1"));
    assert!(body.contains("timegpt_forecast_latency_seconds_sum"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = setup_test_app().await;

    let (status, _, _) = get(app.router, "/analysis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
