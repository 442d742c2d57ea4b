//! HTTP surface of the gateway: `POST <prefix>/chat`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::agent::{build_agent, Agent, AgentError};
use crate::config::Settings;
use crate::model::{AssistantResponse, Message, UserContext};
use crate::orchestrator::ConversationOrchestrator;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, including system, user and assistant messages.
    pub messages: Vec<Message>,
    /// Overrides the configured default agent.
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub user_context: Option<UserContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: AssistantResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Resolves an agent name to an agent, `None` when the name is unknown.
pub type AgentFactory =
    dyn Fn(&str, &Settings) -> Result<Option<Arc<dyn Agent>>, AgentError> + Send + Sync;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    factory: Arc<AgentFactory>,
}

impl AppState {
    /// State resolving agents with [`build_agent`].
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_factory(settings, Arc::new(build_agent))
    }

    pub fn with_factory(settings: Arc<Settings>, factory: Arc<AgentFactory>) -> Self {
        Self { settings, factory }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

fn reject(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    error!(%status, error = %message, "Rejecting /chat request");
    (status, Json(ErrorResponse { error: message }))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ChatRequest {
        messages,
        agent_name,
        user_context,
    } = request;
    let agent_name = agent_name.unwrap_or_else(|| state.settings.default_agent.clone());
    info!(agent = %agent_name, messages = messages.len(), "Received /chat request");

    let agent = match (state.factory)(&agent_name, &state.settings) {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                AgentError::UnknownAgent(agent_name).to_string(),
            ))
        }
        Err(err) => return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    };

    let orchestrator = ConversationOrchestrator::new(agent, Arc::clone(&state.settings));
    let response = orchestrator.handle_messages(messages, user_context).await;
    Ok(Json(ChatResponse { response }))
}

/// Gateway routes under the configured prefix, with permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let chat_path = format!("{}/chat", state.settings.api_prefix);
    Router::new()
        .route(&chat_path, post(chat_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(settings: Arc<Settings>) -> Result<(), ServerError> {
    let addr = settings.gateway_addr;
    let app = router(AppState::new(settings));

    info!(%addr, "Binding gateway server");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "Gateway ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}
