//! Per-turn entry point: builds the base tool context and runs the agent.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::config::Settings;
use crate::model::{AssistantResponse, Message, UserContext};
use crate::tools::context::USER_CONTEXT_KEY;
use crate::tools::ToolContext;

pub struct ConversationOrchestrator {
    agent: Arc<dyn Agent>,
    settings: Arc<Settings>,
}

impl ConversationOrchestrator {
    pub fn new(agent: Arc<dyn Agent>, settings: Arc<Settings>) -> Self {
        Self { agent, settings }
    }

    /// Context every tool call of the turn starts from: backend URL, auth
    /// headers and the caller's identity.
    pub fn build_base_context(&self, user_context: &UserContext) -> ToolContext {
        let mut headers = Vec::new();
        if let Some(key) = &self.settings.crud_api_key {
            headers.push(("x-api-key".to_string(), key.clone()));
        }
        if let Some(token) = &self.settings.crud_bearer_token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        let user_context = serde_json::to_value(user_context).unwrap_or_else(|_| json!({}));

        ToolContext::new()
            .with_metadata(USER_CONTEXT_KEY, user_context)
            .with_base_url(self.settings.crud_base_url.clone())
            .with_default_headers(headers)
    }

    /// Run one turn. Agent failures are reported to the caller as assistant text.
    pub async fn handle_messages(
        &self,
        messages: Vec<Message>,
        user_context: Option<UserContext>,
    ) -> AssistantResponse {
        let user_context = user_context.unwrap_or_default();
        let base_context = self.build_base_context(&user_context);
        info!(
            messages = messages.len(),
            user = user_context.user_id.as_deref(),
            "Handling conversation turn"
        );

        match self.agent.run(messages, base_context).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "Agent failed");
                AssistantResponse::from_text(format!("Sorry, something went wrong: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl Agent for Failing {
        async fn run(
            &self,
            _messages: Vec<Message>,
            _base_context: ToolContext,
        ) -> Result<AssistantResponse, AgentError> {
            Err(AgentError::Config("boom".to_string()))
        }
    }

    #[test]
    fn base_context_carries_auth_and_user() {
        let settings = Settings {
            crud_api_key: Some("k".to_string()),
            crud_bearer_token: Some("t".to_string()),
            ..Settings::default()
        };
        let orchestrator = ConversationOrchestrator::new(Arc::new(Failing), Arc::new(settings));
        let user = UserContext {
            user_id: Some("u1".to_string()),
            ..UserContext::default()
        };

        let context = orchestrator.build_base_context(&user);
        assert_eq!(context.base_url(), Some("http://localhost:5000"));
        let headers = context.default_headers();
        assert_eq!(headers["x-api-key"], "k");
        assert_eq!(headers["authorization"], "Bearer t");
        assert_eq!(context.metadata[USER_CONTEXT_KEY], json!({"user_id": "u1", "metadata": {}}));
        assert_eq!(context.user_context(), Some(user));
    }

    #[test]
    fn no_auth_headers_without_credentials() {
        let orchestrator =
            ConversationOrchestrator::new(Arc::new(Failing), Arc::new(Settings::default()));
        let context = orchestrator.build_base_context(&UserContext::default());
        assert!(context.default_headers().is_empty());
    }

    #[tokio::test]
    async fn agent_failure_becomes_assistant_text() {
        let orchestrator =
            ConversationOrchestrator::new(Arc::new(Failing), Arc::new(Settings::default()));
        let response = orchestrator
            .handle_messages(vec![Message::user("hi")], None)
            .await;
        assert_eq!(
            response.final_text.as_deref(),
            Some("Sorry, something went wrong: Configuration error: boom")
        );
    }
}
