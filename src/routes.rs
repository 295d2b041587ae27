use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    models::{EngineInfo, FittingRequest, FittingResponse},
    pipeline::{FittingService, ProgressLog},
    session::{FittingSession, LoadingGuard, Ticket},
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FittingService>,
    pub sessions: Arc<RwLock<HashMap<String, Arc<FittingSession>>>>,
}

impl AppState {
    pub fn new(service: FittingService) -> Self {
        Self { service: Arc::new(service), sessions: Arc::default() }
    }

    /// Look up (or create) the session and take a ticket under the same lock,
    /// so eviction cannot orphan a session between the two steps.
    fn begin(&self, id: &str) -> TrackedRequest {
        let mut sessions = self.sessions.write();
        let session = Arc::clone(sessions.entry(id.to_string()).or_default());
        let (ticket, loading) = session.begin();
        TrackedRequest { state: self.clone(), id: id.to_string(), session, ticket, loading: Some(loading) }
    }

    /// Forget sessions with nothing in flight so the map does not grow unbounded.
    fn evict_idle(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if sessions.get(id).is_some_and(|s| s.is_idle()) {
            sessions.remove(id);
        }
    }
}

/// One in-flight request of a session. Dropping it, including when the client
/// disconnects and the handler future is cancelled, clears the loading state
/// and evicts the session once nothing else is in flight.
struct TrackedRequest {
    state: AppState,
    id: String,
    session: Arc<FittingSession>,
    ticket: Ticket,
    loading: Option<LoadingGuard>,
}

impl Drop for TrackedRequest {
    fn drop(&mut self) {
        drop(self.loading.take());
        self.state.evict_idle(&self.id);
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/engines", get(list_engines))
        .route("/api/fitting", post(generate_fitting))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_engines(State(state): State<AppState>) -> Json<Vec<EngineInfo>> {
    Json(state.service.offered_engines())
}

pub async fn generate_fitting(State(state): State<AppState>, Json(body): Json<FittingRequest>) -> Response {
    tracing::info!("🚀 Fitting request: engine={} garment={}", body.engine, body.garment_description);

    let tracked = body.session_id.as_deref().map(|id| state.begin(id));

    let progress = ProgressLog::default();
    let outcome = state
        .service
        .generate(
            &body.engine,
            &body.subject_image,
            &body.garment_description,
            body.style_hint.as_deref(),
            &progress,
        )
        .await;

    let outcome = match &tracked {
        Some(request) => request.session.commit(request.ticket, outcome),
        None => Ok(outcome),
    };
    drop(tracked);

    match outcome {
        Ok(Ok(result)) => {
            Json(FittingResponse { result, progress: progress.labels() }).into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(superseded) => (
            StatusCode::CONFLICT,
            Json(json!({
                "kind": "superseded",
                "message": superseded.to_string(),
                "guidance": "A newer fitting request replaced this one.",
                "retryable": false
            })),
        )
            .into_response(),
    }
}
