use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::engine::{SubscriptionEngine, WorkerInfo};
use crate::error::SubscribeError;
use crate::service::SubscriptionService;
use crate::slack::{self, CommandReply, SignatureError, SlashCommand};

#[derive(Clone)]
pub struct AppState {
    service: Arc<SubscriptionService>,
    engine: Arc<SubscriptionEngine>,
    signing_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<SubscriptionService>, engine: Arc<SubscriptionEngine>, signing_secret: Option<String>) -> Self {
        if signing_secret.is_none() {
            warn!("No Slack signing secret configured, slash commands are accepted unsigned");
        }
        Self {
            service,
            engine,
            signing_secret: signing_secret.map(Into::into),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] SignatureError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub fn create_web_api(state: AppState) -> Router {
    Router::new()
        .route("/slack/commands", post(slash_command_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/workers/:worker_id", get(get_worker_handler))
        .route("/api/health", get(health_check_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Accepts a slash command, verifies its signature and replies with a
/// Slack message describing the outcome. Command errors are replied with
/// status 200 so Slack shows them to the user.
async fn slash_command_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CommandReply>, ApiError> {
    if let Some(secret) = &state.signing_secret {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        slack::verify_signature(
            secret,
            header(slack::TIMESTAMP_HEADER),
            header(slack::SIGNATURE_HEADER),
            &body,
            chrono::Utc::now().timestamp(),
        )
        .inspect_err(|e| warn!("Rejected slash command: {}", e))?;
    }

    let command = SlashCommand::parse(&body);
    info!("Slash command from {} in {}: {} {}", command.user_id, command.channel_id, command.command, command.text);

    let request = command.to_request();
    let reply = match state.service.handle(&request).await {
        Ok(outcome) => CommandReply::success(&outcome),
        Err(e) => {
            match &e {
                SubscribeError::Validation(_) | SubscribeError::UnknownEvent(_) => {
                    warn!("Invalid slash command '{}': {}", command.text, e)
                }
                _ => error!("Failed to handle slash command '{}': {:#}", command.text, e),
            }
            CommandReply::error(&e)
        }
    };

    Ok(Json(reply))
}

async fn list_workers_handler(State(state): State<AppState>) -> Json<Vec<WorkerInfo>> {
    // Clean up finished workers before listing
    state.engine.cleanup_finished().await;
    Json(state.engine.workers().await)
}

async fn get_worker_handler(
    Path(worker_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WorkerInfo>, ApiError> {
    state
        .engine
        .get_worker(&worker_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Worker not found: {}", worker_id)))
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn start_web_server(state: AppState, bind_address: &str) -> anyhow::Result<()> {
    let app = create_web_api(state);

    info!("Starting web server on {}", bind_address);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_address, e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Web server error: {}", e))?;

    Ok(())
}
