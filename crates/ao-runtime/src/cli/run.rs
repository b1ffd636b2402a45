//! `agentorch run` — one-shot execution command.
//!
//! Sends a single message through one turn, streams the response to
//! stdout, and exits. Useful for scripting and quick manual checks.

use std::io::Write;
use std::sync::Arc;

use ao_domain::config::{Config, ToolPolicy};
use ao_domain::tool::Message;
use ao_events::{Event, TYPE_ERROR, TYPE_MESSAGE};
use ao_session::SystemContext;
use uuid::Uuid;

use crate::bootstrap;
use crate::controller::{Controller, RunTurnRequest};
use crate::phase_runner::ModelOverride;

pub async fn run(config: Config, message: String, session: Option<String>, json_output: bool) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;

    let session_id = session
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let agent_id = state.config.workspace.path.display().to_string();
    let memory_handle = state.config.agents.contains_key(&agent_id).then(|| agent_id.clone());
    let session_ctx = state
        .sessions
        .get_or_create(session_id, || SystemContext::new(agent_id, String::new()), memory_handle);

    let (bus, cancel, mut rx) = state.open_run(session_id);
    let dispatcher = Arc::new(state.tools.view(ToolPolicy::default()));
    let controller = Controller::new(
        state.llm.clone(),
        dispatcher,
        bus,
        state.config.clone(),
        state.memory_extractor.clone(),
    );
    let tool_defs = state.tools.definitions();

    let drain = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if json_output {
                events.push(event);
            } else {
                print_event(&event);
            }
        }
        events
    });

    let request = RunTurnRequest {
        messages: vec![Message::user(session_id, message)],
        deep_thinking: None,
        multi_agent: None,
        more_suggest: false,
        max_loop_count: None,
        available_workflows: Vec::new(),
        model_override: ModelOverride::default(),
    };
    let result = controller.run_turn(&session_ctx, request, tool_defs, &cancel).await;
    state.interrupts.remove(session_id);

    let events = drain.await.unwrap_or_default();
    if json_output {
        let json = serde_json::to_string_pretty(&events).map_err(|e| anyhow::anyhow!("serializing events: {e}"))?;
        println!("{json}");
    }

    match result {
        Ok(turn) => {
            if !json_output {
                println!("{}", turn.reply_text);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn print_event(event: &Event) {
    let kind = event.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
    if event.event_type == TYPE_MESSAGE {
        match kind {
            "token" => {
                if let Some(text) = event.payload.get("text").and_then(|v| v.as_str()) {
                    print!("{text}");
                    std::io::stdout().flush().ok();
                }
            }
            "tool_call_started" => {
                if let Some(name) = event.payload.get("tool_name").and_then(|v| v.as_str()) {
                    eprintln!("\x1b[2m[tool: {name}]\x1b[0m");
                }
            }
            "task_cancelled" => eprintln!("\x1b[2m[task cancelled]\x1b[0m"),
            "failure_diagnostic" => {
                if let Some(error_kind) = event.payload.get("error_kind").and_then(|v| v.as_str()) {
                    eprintln!("\x1b[2m[failure: {error_kind}]\x1b[0m");
                }
            }
            _ => {}
        }
    } else if event.event_type == TYPE_ERROR {
        if let Some(message) = event.payload.get("message").and_then(|v| v.as_str()) {
            eprintln!("\x1b[31merror ({kind}): {message}\x1b[0m");
        }
    } else if event.event_type == "stream_end" {
        println!();
    }
}
