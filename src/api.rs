//! REST API server for the stock assistant
//!
//! Exposes the orchestrator over HTTP for the chat frontend.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Orchestrator;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptObject {
    pub content: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: PromptObject,
    pub thread_id: String,
    #[serde(default)]
    pub response_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndThreadResponse {
    pub thread_id: String,
    pub ended: bool,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "threads": state.orchestrator.memory().thread_count(),
        "policy_version": state.orchestrator.policy().version,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    info!(
        thread_id = %req.thread_id,
        prompt_id = %req.prompt.id,
        response_id = %req.response_id,
        "Chat request"
    );

    let reply = state
        .orchestrator
        .handle_turn(&req.thread_id, &req.prompt.content)
        .await;

    Json(ChatResponse {
        response: reply.response,
    })
}

/// =============================
/// Thread Lifecycle
/// =============================

async fn end_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
) -> (StatusCode, Json<EndThreadResponse>) {
    let ended = state.orchestrator.end_thread(&thread_id).await;
    let status = if ended {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(EndThreadResponse { thread_id, ended }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/threads/:thread_id", delete(end_thread))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
