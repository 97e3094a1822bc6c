//! HTTP control surface for the change listener.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::listener::ListenerSupervisor;

#[derive(Clone)]
pub struct AppState {
    pub listener: Arc<ListenerSupervisor>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    success: bool,
    message: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/automation/status", get(status))
        .route("/automation/start", post(start))
        .route("/automation/stop", post(stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Server is running",
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.listener.is_running(),
    })
}

async fn start(State(state): State<AppState>) -> Json<ActionResponse> {
    let success = state.listener.start();
    let message = if success {
        info!("Automation started via control surface");
        "Automation started"
    } else {
        "Automation already running"
    };
    Json(ActionResponse { success, message })
}

async fn stop(State(state): State<AppState>) -> Json<ActionResponse> {
    let success = state.listener.stop().await;
    let message = if success {
        info!("Automation stopped via control surface");
        "Automation stopped"
    } else {
        "Automation already stopped"
    };
    Json(ActionResponse { success, message })
}
