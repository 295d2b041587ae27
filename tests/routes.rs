mod common;

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{calls, Harness, Reply, Setup, PET_URI};
use pet_fitting::{
    routes::{app, AppState},
    Engine,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceExt;

fn router(h: Harness) -> (Router, AppState) {
    let state = AppState::new(h.service);
    (app(state.clone()), state)
}

fn fitting(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/fitting")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = router(Harness::new(Setup::default()));
    let req = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn engines_lists_only_configured_ones() {
    let (app, _) = router(Harness::new(Setup {
        engines: vec![Engine::Gemini, Engine::Doubao],
        ..Setup::default()
    }));
    let req = Request::builder().uri("/api/engines").body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            { "engine": "gemini", "strategy": "vision-guided-inpaint", "preserves_identity": true },
            { "engine": "doubao", "strategy": "direct-caption", "preserves_identity": false }
        ])
    );
}

#[tokio::test]
async fn fitting_returns_result_with_progress() {
    let (app, _) = router(Harness::new(Setup::default()));
    let (status, body) = send(
        app,
        fitting(json!({
            "engine": "fal",
            "subject_image": PET_URI,
            "garment_description": "red raincoat"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_ref"], "https://fal.media/fitting-1");
    assert_eq!(body["strategy"], "fast-inpaint");
    assert_eq!(body["masked"], true);
    assert_eq!(
        body["progress"],
        json!(["preparing photo", "isolating body region", "rendering", "done"])
    );
}

#[tokio::test]
async fn unsupported_engine_is_a_bad_request() {
    let h = Harness::new(Setup::default());
    let fetcher = Arc::clone(&h.fetcher);
    let (app, _) = router(h);

    let (status, body) = send(
        app,
        fitting(json!({
            "engine": "unknown-engine-x",
            "subject_image": PET_URI,
            "garment_description": "red raincoat"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsupported_engine");
    assert_eq!(body["retryable"], false);
    assert!(!body["guidance"].as_str().unwrap().is_empty());
    assert_eq!(calls(&fetcher.calls), 0);
}

#[tokio::test]
async fn newer_request_supersedes_older_one_in_same_session() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(Setup {
        inpaint: Reply::GateFirst(Arc::clone(&gate), "https://fal.media/fitting"),
        ..Setup::default()
    });
    let inpainter = Arc::clone(&h.inpainter);
    let (app, state) = router(h);

    let first = tokio::spawn(send(
        app.clone(),
        fitting(json!({
            "engine": "fal",
            "subject_image": PET_URI,
            "garment_description": "red raincoat",
            "session_id": "owner-1"
        })),
    ));

    // Wait until the first request is parked inside the render call.
    while calls(&inpainter.calls) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = send(
        app,
        fitting(json!({
            "engine": "fal",
            "subject_image": PET_URI,
            "garment_description": "yellow raincoat",
            "session_id": "owner-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_ref"], "https://fal.media/fitting-2");

    gate.notify_one();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "superseded");

    // Both finished, so the session is gone.
    assert!(state.sessions.read().is_empty());
}

#[tokio::test]
async fn abandoned_request_releases_its_session() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(Setup {
        inpaint: Reply::GateFirst(Arc::clone(&gate), "https://fal.media/fitting"),
        ..Setup::default()
    });
    let inpainter = Arc::clone(&h.inpainter);
    let (app, state) = router(h);

    let pending = tokio::spawn(send(
        app,
        fitting(json!({
            "engine": "fal",
            "subject_image": PET_URI,
            "garment_description": "red raincoat",
            "session_id": "owner-2"
        })),
    ));
    while calls(&inpainter.calls) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state.sessions.read().len(), 1);

    // Client went away: the handler future is dropped mid-render.
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert!(state.sessions.read().is_empty());
}
