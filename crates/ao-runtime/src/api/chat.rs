//! Run ingress — the primary interface for driving agent turns.
//!
//! `POST /v1/runs` opens a turn and streams its events back as SSE.
//! `POST /v1/sessions/:id/interrupt` requests cooperative cancellation of
//! whatever run is currently in flight for that session.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use ao_domain::config::ToolPolicy;
use ao_domain::task::Workflow;
use ao_domain::tool::{Message, Role};
use ao_session::SystemContext;

use crate::controller::{Controller, RunTurnRequest};
use crate::phase_runner::ModelOverride;
use crate::state::AppState;

/// One entry of the ingress `messages` array. Converted to a domain
/// [`Message`] once the target session is known.
#[derive(Debug, Deserialize)]
pub struct IngressMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct LlmModelConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    /// Existing session id to continue, or absent to start a fresh one.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// The new turn's message(s), appended to whatever history the
    /// session already holds.
    pub messages: Vec<IngressMessage>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub deep_thinking: Option<bool>,
    #[serde(default)]
    pub multi_agent: Option<bool>,
    #[serde(default)]
    pub more_suggest: bool,
    #[serde(default)]
    pub max_loop_count: Option<u32>,
    #[serde(default)]
    pub available_tools: Option<Vec<String>>,
    #[serde(default)]
    pub available_workflows: HashMap<String, Workflow>,
    #[serde(default)]
    pub system_context: HashMap<String, String>,
    #[serde(default)]
    pub llm_model_config: LlmModelConfig,
    #[serde(default)]
    pub system_prefix: Option<String>,
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn create_run(State(state): State<AppState>, Json(body): Json<CreateRunRequest>) -> impl IntoResponse {
    if state.llm.is_empty() {
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "no_llm_provider",
                "reason": "no LLM providers configured under [llm]",
            })),
        )
            .into_response();
    }

    let session_id = body.session_id.unwrap_or_else(Uuid::new_v4);
    let agent_id = body.agent_id.clone().unwrap_or_else(|| "default".to_string());
    let system_prefix = body.system_prefix.clone().unwrap_or_default();
    let system_context = body.system_context.clone();
    // A configured agent gets its own memory scope; an ad hoc agent_id
    // with no [agents.<id>] entry gets no memory extraction.
    let memory_handle = state.config.agents.contains_key(&agent_id).then(|| agent_id.clone());

    let session = state.sessions.get_or_create(
        session_id,
        move || SystemContext::new(agent_id, system_prefix).with_values(system_context),
        memory_handle,
    );

    let (bus, cancel, rx) = state.open_run(session_id);
    let policy = ToolPolicy {
        allow: body.available_tools.clone().unwrap_or_default(),
        deny: Vec::new(),
    };
    let dispatcher = Arc::new(state.tools.view(policy.clone()));
    let controller = Controller::new(
        state.llm.clone(),
        dispatcher,
        bus,
        state.config.clone(),
        state.memory_extractor.clone(),
    );
    let tool_defs = state
        .tools
        .definitions()
        .into_iter()
        .filter(|def| policy.allows(&def.name))
        .collect();

    let messages = body
        .messages
        .into_iter()
        .map(|m| ingress_to_message(session_id, m))
        .collect();
    let available_workflows = body.available_workflows.into_iter().collect();
    let request = RunTurnRequest {
        messages,
        deep_thinking: body.deep_thinking,
        multi_agent: body.multi_agent,
        more_suggest: body.more_suggest,
        max_loop_count: body.max_loop_count,
        available_workflows,
        model_override: ModelOverride {
            model: body.llm_model_config.model,
            max_tokens: body.llm_model_config.max_tokens,
            temperature: body.llm_model_config.temperature,
        },
    };

    let interrupts = state.interrupts.clone();
    tokio::spawn(async move {
        let _ = controller.run_turn(&session, request, tool_defs, &cancel).await;
        interrupts.remove(session_id);
    });

    let stream = make_sse_stream(rx);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

pub async fn interrupt_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let found = state.interrupts.interrupt(id);
    if found {
        Json(serde_json::json!({ "interrupted": true })).into_response()
    } else {
        (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no_such_session", "interrupted": false })),
        )
            .into_response()
    }
}

fn ingress_to_message(session_id: Uuid, msg: IngressMessage) -> Message {
    match msg.role {
        Role::System => Message::system(session_id, msg.content),
        Role::User => Message::user(session_id, msg.content),
        Role::Assistant => Message::assistant(session_id, msg.content),
        Role::Tool => Message::tool_result(session_id, "", msg.content),
    }
}

fn make_sse_stream(mut rx: ao_events::EventReceiver) -> impl Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(SseEvent::default().event(event.event_type.clone()).data(data));
        }
    }
}
