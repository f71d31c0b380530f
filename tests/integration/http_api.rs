//! HTTP status/control surface, driven with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use futures::StreamExt;
use tether::acquisition::{AcquisitionMode, CameraService};
use tether::camera::mock::MockGateway;
use tether::events::EventBus;
use tether::server::{AppState, router};
use tower::ServiceExt;

use crate::common::fast_settings;

struct Api {
    _dir: tempfile::TempDir,
    state: AppState<MockGateway>,
}

fn api() -> Api {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::default();
    let service = CameraService::new(
        Arc::new(MockGateway::canon()),
        fast_settings(dir.path(), AcquisitionMode::Tethered),
        Arc::new(events.clone()),
    );
    Api {
        _dir: dir,
        state: AppState { service, events },
    }
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_status_json() {
    let api = api();
    let response = router(api.state.clone())
        .oneshot(request(Method::GET, "/api/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["connected"], false);
    assert_eq!(json["state"], "disconnected");
    assert_eq!(json["paused"], false);
}

#[tokio::test]
async fn test_pause_resume_and_reset() {
    let api = api();

    let response = router(api.state.clone())
        .oneshot(request(Method::POST, "/api/pause"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(api.state.service.is_paused());

    let response = router(api.state.clone())
        .oneshot(request(Method::POST, "/api/resume"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!api.state.service.is_paused());

    let response = router(api.state.clone())
        .oneshot(request(Method::POST, "/api/session/reset"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_control_routes_reject_get() {
    let api = api();
    let response = router(api.state.clone())
        .oneshot(request(Method::GET, "/api/pause"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let api = api();
    let response = router(api.state.clone())
        .oneshot(request(Method::GET, "/photos/IMG_0001.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_stream_starts_with_status() {
    let api = api();
    let response = router(api.state.clone())
        .oneshot(request(Method::GET, "/api/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8_lossy(&first);
    assert!(text.contains("event: status"), "{text}");
    assert!(text.contains("\"state\":\"disconnected\""), "{text}");
}
