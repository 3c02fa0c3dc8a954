//! Non-streaming HTTP chat adapter.
//!
//! `POST /chat` runs the text workflow through the same bus/dispatcher
//! pair as the streaming transports, drains a single consumer until the
//! terminal sentinel, and returns the accumulated response in one JSON
//! body.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use voxgate_core::bus::StreamBus;
use voxgate_core::event::EventPayload;
use voxgate_core::request::{ChatRequest, Prompt, RequestType, Settings};
use voxgate_core::workflow::{self, WorkflowChannels};

use crate::error::HttpError;
use crate::sse::drain_all;
use crate::state::AppState;

/// Request body for the non-streaming endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub prompt: Prompt,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub settings: Settings,
    /// Optional explicit customer override; defaults to the token's `sub`.
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub code: u16,
    pub data: ChatData,
}

#[derive(Debug, Serialize)]
pub struct ChatData {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    pub requires_tool_action: bool,
}

/// `POST /chat` — collect a full response body.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, HttpError> {
    let claims = state.auth.verify_bearer(&headers)?;
    let customer_id = body.customer_id.unwrap_or(claims.sub);

    let request = ChatRequest {
        request_type: RequestType::Text,
        prompt: Some(body.prompt),
        session_id: body.session_id,
        settings: body.settings,
    };

    let (bus, token) = StreamBus::new(state.queue_capacity);
    let (_consumer_id, receiver) = bus.register_consumer();

    let channels = WorkflowChannels::detached(CancellationToken::new());
    tokio::spawn(workflow::run(
        Arc::clone(&state.deps),
        bus,
        token,
        request,
        customer_id,
        channels,
    ));

    let events = drain_all(receiver).await;
    Ok(Json(collect_response(events)))
}

/// Fold a drained event sequence into the response body.
fn collect_response(events: Vec<voxgate_core::event::Event>) -> ChatResponse {
    let mut text = String::new();
    let mut model = None;
    let mut provider = None;
    let mut session_id = None;
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut requires_tool_action = false;
    let mut error: Option<(String, Option<String>)> = None;

    for event in events {
        if session_id.is_none() {
            session_id.clone_from(&event.session_id);
        }
        match &event.payload {
            EventPayload::TextChunk { content } => text.push_str(content),
            EventPayload::ToolStart { name, arguments } => {
                requires_tool_action = true;
                tool_calls.push(serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                }));
            }
            EventPayload::TextCompleted => {
                requires_tool_action = false;
                model.clone_from(&event.model);
                provider.clone_from(&event.provider);
            }
            EventPayload::Error { message } => {
                if error.is_none() {
                    error = Some((message.clone(), event.stage.clone()));
                }
            }
            _ => {}
        }
    }

    let (success, code) = match &error {
        None => (true, 200),
        Some((_, stage)) if stage.as_deref() == Some("validation") => (false, 400),
        Some((_, stage)) if stage.as_deref() == Some("persistence") => (true, 200),
        Some(_) => (false, 502),
    };

    ChatResponse {
        success,
        code,
        data: ChatData {
            text,
            model,
            provider,
            session_id,
            metadata: error
                .map(|(message, stage)| {
                    serde_json::json!({ "error": message, "stage": stage })
                })
                .unwrap_or_else(|| serde_json::json!({})),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            requires_tool_action,
        },
    }
}
