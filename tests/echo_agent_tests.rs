use std::sync::{Arc, Mutex};

use assistant_gateway::agent::build_agent;
use assistant_gateway::config::USER_AGENT;
use assistant_gateway::http::{HttpTransport, RestRequest, RestResponse, TransportError};
use assistant_gateway::model::{Message, Role};
use assistant_gateway::tools::{RestTool, ToolContext, ToolRegistry};
use assistant_gateway::{Agent, ConversationOrchestrator, EchoAgent, Settings};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct MockTransport {
    requests: Arc<Mutex<Vec<RestRequest>>>,
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(RestResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: r#"{"id":"1"}"#.to_string(),
        })
    }
}

fn agent_with(transport: &MockTransport) -> EchoAgent {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            RestTool::builder("todo.get", "Get a todo by id. GET /todos/{id}")
                .transport(Arc::new(transport.clone()))
                .build(),
        )
        .unwrap();
    EchoAgent::with_registry(registry)
}

#[tokio::test]
async fn test_echo_replies_with_user_text() {
    let agent = EchoAgent::from_settings(&Settings::default()).unwrap();
    let response = agent
        .run(vec![Message::user("  hello there ")], ToolContext::new())
        .await
        .unwrap();

    assert_eq!(response.final_text.as_deref(), Some("You said: hello there"));
    assert_eq!(response.messages[0].role, Role::Assistant);
}

#[tokio::test]
async fn test_echo_greets_without_user_message() {
    let agent = EchoAgent::from_settings(&Settings::default()).unwrap();
    let response = agent
        .run(vec![Message::assistant("earlier")], ToolContext::new())
        .await
        .unwrap();

    assert_eq!(response.messages[0].content, "How can I help you today?");
    assert_eq!(response.final_text, None);
}

#[tokio::test]
async fn test_direct_tool_call_uses_base_context() {
    let transport = MockTransport::default();
    let agent = agent_with(&transport);
    let base = ToolContext::new()
        .with_base_url("http://backend")
        .with_default_headers([("x-api-key", "secret")]);

    let response = agent
        .run(
            vec![Message::user(r#"TOOL: todo.get {"path": "/todos/1", "method": "get"}"#)],
            base,
        )
        .await
        .unwrap();

    assert_eq!(response.final_text.as_deref(), Some(r#"Tool todo.get result: {"id": "1"}"#));
    assert_eq!(response.steps.len(), 1);
    let call = &response.steps[0].tool_calls[0];
    assert_eq!(call.name, "todo.get");
    assert_eq!(response.tool_results[0].tool_call_id.as_deref(), Some(call.id.as_str()));

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].url, "http://backend/todos/1");
    assert_eq!(requests[0].headers["x-api-key"], "secret");
}

#[tokio::test]
async fn test_direct_call_to_unknown_tool() {
    let agent = agent_with(&MockTransport::default());
    let response = agent
        .run(vec![Message::user(r#"tool: nope {"a": 1}"#)], ToolContext::new())
        .await
        .unwrap();

    assert_eq!(response.final_text.as_deref(), Some("Unknown tool: nope"));
    assert_eq!(response.steps.len(), 1);
    assert!(response.tool_results.is_empty());
}

#[tokio::test]
async fn test_direct_call_failures_are_reported() {
    let transport = MockTransport::default();
    let agent = agent_with(&transport);

    for content in [
        "tool: todo.get",
        "tool: todo.get {not json",
        r#"tool: todo.get {"path": "/todos/1", "method": "GET"}"#,
    ] {
        let response = agent
            .run(vec![Message::user(content)], ToolContext::new())
            .await
            .unwrap();
        assert!(
            response.messages[0]
                .content
                .starts_with("Failed to parse or execute tool call: "),
            "unexpected reply for {content}: {}",
            response.messages[0].content
        );
        assert!(response.steps.is_empty());
    }

    // The last command lacked a base URL, so nothing was sent.
    assert!(transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_orchestrator_passes_auth_to_tools() {
    let transport = MockTransport::default();
    let settings = Settings {
        crud_base_url: "http://crud:5000/api".to_string(),
        crud_bearer_token: Some("jwt".to_string()),
        ..Settings::default()
    };
    let orchestrator =
        ConversationOrchestrator::new(Arc::new(agent_with(&transport)), Arc::new(settings));

    let response = orchestrator
        .handle_messages(
            vec![Message::user(r#"tool: todo.get {"path": "todos/7", "method": "GET"}"#)],
            None,
        )
        .await;

    assert_eq!(response.tool_results[0].output, json!({"id": "1"}));
    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests[0].url, "http://crud:5000/api/todos/7");
    assert_eq!(requests[0].headers["authorization"], "Bearer jwt");
}

async fn list_todos(
    State(seen): State<Arc<Mutex<Vec<HeaderMap>>>>,
    headers: HeaderMap,
) -> Json<Value> {
    seen.lock().unwrap().push(headers);
    Json(json!([{"id": "1"}]))
}

#[tokio::test]
async fn test_configured_agent_uses_settings_transport() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/todos", get(list_todos))
        .with_state(Arc::clone(&seen));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let settings = Arc::new(Settings {
        crud_base_url: format!("http://{addr}"),
        crud_api_key: Some("secret".to_string()),
        ..Settings::default()
    });
    let agent = build_agent("echo", &settings).unwrap().unwrap();
    let orchestrator = ConversationOrchestrator::new(agent, Arc::clone(&settings));

    let response = orchestrator
        .handle_messages(
            vec![Message::user(r#"tool: todo.list {"path": "/todos", "method": "GET"}"#)],
            None,
        )
        .await;

    assert_eq!(response.tool_results[0].output, json!([{"id": "1"}]));
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["user-agent"], USER_AGENT);
    assert_eq!(seen[0]["x-api-key"], "secret");
}
