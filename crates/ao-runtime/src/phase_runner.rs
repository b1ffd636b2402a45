//! Runs a single phase to completion: calls the phase's assigned LLM
//! role, streams tokens/tool-call events onto the session's event bus,
//! dispatches any tool calls through a [`ScopedDispatcher`], and feeds
//! results back until the model stops calling tools or the round bound
//! is hit.

use std::sync::Arc;
use std::time::Duration;

use ao_domain::error::{Error, Result};
use ao_domain::stream::{StreamEvent, Usage};
use ao_domain::tool::{Message, ToolCall, ToolDefinition};
use ao_events::{EventBus, TYPE_ERROR, TYPE_MESSAGE};
use ao_providers::{ChatRequest, LlmProvider};
use ao_tools::ScopedDispatcher;
use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use crate::interrupt::CancelHandle;

/// Maximum number of model/tool round-trips within one phase before
/// `Error::ToolLoopExceeded` is raised.
pub const DEFAULT_ROUND_BOUND: u32 = 8;

/// Default number of times a transport-level LLM failure is retried,
/// mirroring `ao-tools::ScopedDispatcher`'s backoff policy.
pub const DEFAULT_LLM_RETRIES: u32 = 3;
const LLM_BASE_BACKOFF_MS: u64 = 100;

pub struct PhaseRunner {
    pub provider: Arc<dyn LlmProvider>,
    pub dispatcher: Arc<ScopedDispatcher>,
    pub events: EventBus,
    pub round_bound: u32,
    pub llm_retries: u32,
    pub tool_deadline: std::time::Duration,
}

/// Per-phase model overrides sourced from a turn's `llm_model_config`.
#[derive(Debug, Clone, Default)]
pub struct ModelOverride {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// How a phase's round loop actually ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRunStatus {
    Completed,
    Interrupted,
    Failed,
}

/// What a phase produced once the loop stops, plus how it stopped. On
/// `Interrupted`/`Failed`, `messages_appended` still holds whatever partial
/// content was produced — a caller must append it to the session's
/// transcript before deciding how to report the outcome.
pub struct PhaseOutcome {
    pub assistant_text: String,
    pub messages_appended: Vec<Message>,
    pub usage: Usage,
    pub status: PhaseRunStatus,
    pub error: Option<Error>,
}

impl PhaseRunner {
    pub fn new(provider: Arc<dyn LlmProvider>, dispatcher: Arc<ScopedDispatcher>, events: EventBus) -> Self {
        Self {
            provider,
            dispatcher,
            events,
            round_bound: DEFAULT_ROUND_BOUND,
            llm_retries: DEFAULT_LLM_RETRIES,
            tool_deadline: std::time::Duration::from_secs(30),
        }
    }

    /// Run `phase` over `history`, looping through tool calls until the
    /// model replies without one, the session is interrupted, or
    /// `round_bound` rounds have elapsed.
    pub async fn run(
        &self,
        phase: &str,
        session_id: Uuid,
        mut history: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: &CancelHandle,
        json_mode: bool,
        model_override: &ModelOverride,
    ) -> PhaseOutcome {
        let mut appended = Vec::new();
        let mut total_usage = Usage::default_zero();

        for round_num in 0..self.round_bound {
            if cancel.is_cancelled() {
                return self.flush_interrupted(session_id, appended, total_usage, String::new());
            }

            let req = ChatRequest {
                messages: history.clone(),
                tools: tools.clone(),
                temperature: model_override.temperature,
                max_tokens: model_override.max_tokens,
                json_mode,
                model: model_override.model.clone(),
            };

            let message_id = Uuid::new_v4();
            let round = match self.run_round_with_retry(phase, &req, session_id, message_id, cancel).await {
                RoundOutcome::Ok(r) => r,
                RoundOutcome::Interrupted { partial_text } => {
                    return self.flush_interrupted(session_id, appended, total_usage, partial_text);
                }
                RoundOutcome::Err(e) => {
                    self.publish_error(message_id, &e).await;
                    return PhaseOutcome {
                        assistant_text: String::new(),
                        messages_appended: appended,
                        usage: total_usage,
                        status: PhaseRunStatus::Failed,
                        error: Some(wrap_phase_failed(phase, e)),
                    };
                }
            };

            if let Some(usage) = &round.usage {
                total_usage = total_usage.add(usage);
            }
            ao_domain::trace::TraceEvent::LlmRequest {
                provider: self.provider.provider_id().to_string(),
                model: req.model.clone().unwrap_or_else(|| "default".to_string()),
                role: phase.to_string(),
                streaming: true,
                duration_ms: 0,
                prompt_tokens: round.usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: round.usage.as_ref().map(|u| u.completion_tokens),
            }
            .emit();

            let tool_calls = match self.repair_malformed_calls(phase, round.tool_calls, &mut history, session_id, cancel).await {
                Ok(calls) => calls,
                Err(e) => {
                    return PhaseOutcome {
                        assistant_text: round.text,
                        messages_appended: appended,
                        usage: total_usage,
                        status: PhaseRunStatus::Failed,
                        error: Some(wrap_phase_failed(phase, e)),
                    };
                }
            };

            let mut assistant_msg = Message::assistant(session_id, round.text.clone());
            assistant_msg.tool_calls = tool_calls.clone();
            history.push(assistant_msg.clone());
            appended.push(assistant_msg);

            if tool_calls.is_empty() {
                return PhaseOutcome {
                    assistant_text: round.text,
                    messages_appended: appended,
                    usage: total_usage,
                    status: PhaseRunStatus::Completed,
                    error: None,
                };
            }

            if cancel.is_cancelled() {
                return self.flush_interrupted(session_id, appended, total_usage, round.text);
            }

            for call in &tool_calls {
                if cancel.is_cancelled() {
                    return self.flush_interrupted(session_id, appended, total_usage, round.text);
                }
                ao_domain::trace::TraceEvent::ToolDispatched {
                    session_id: session_id.to_string(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                }
                .emit();

                let started = std::time::Instant::now();
                let outcome = self
                    .dispatcher
                    .invoke(&call.tool_name, call.arguments.clone(), self.tool_deadline)
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let (result_msg, ok) = match outcome {
                    ao_tools::InvokeOutcome::Ok(value) => {
                        let text = result_to_text(&value);
                        (Message::tool_result(session_id, call.call_id.clone(), text), true)
                    }
                    ao_tools::InvokeOutcome::Err { kind, detail } => {
                        let text = format!("{kind}: {detail}");
                        let mut msg = Message::tool_result(session_id, call.call_id.clone(), text);
                        if let ao_domain::tool::MessageContent::Parts(parts) = &mut msg.content {
                            if let Some(ao_domain::tool::ContentPart::ToolResult { is_error, .. }) =
                                parts.first_mut()
                            {
                                *is_error = true;
                            }
                        }
                        (msg, false)
                    }
                };

                ao_domain::trace::TraceEvent::ToolCompleted {
                    session_id: session_id.to_string(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    duration_ms,
                    ok,
                }
                .emit();

                let _ = self
                    .events
                    .publish(
                        Uuid::new_v4(),
                        TYPE_MESSAGE,
                        serde_json::json!({"kind": "tool_result", "call_id": call.call_id, "ok": ok}),
                    )
                    .await;

                history.push(result_msg.clone());
                appended.push(result_msg);
            }

            if round_num + 1 == self.round_bound {
                ao_domain::trace::TraceEvent::ToolLoopBoundHit {
                    session_id: session_id.to_string(),
                    turn_id: Uuid::new_v4().to_string(),
                    rounds: self.round_bound,
                }
                .emit();
                return PhaseOutcome {
                    assistant_text: String::new(),
                    messages_appended: appended,
                    usage: total_usage,
                    status: PhaseRunStatus::Failed,
                    error: Some(Error::ToolLoopExceeded { bound: self.round_bound }),
                };
            }
        }

        unreachable!("loop always returns within round_bound iterations")
    }

    fn flush_interrupted(
        &self,
        session_id: Uuid,
        mut appended: Vec<Message>,
        usage: Usage,
        partial_text: String,
    ) -> PhaseOutcome {
        if !partial_text.is_empty() {
            let msg = Message::assistant(session_id, partial_text.clone());
            appended.push(msg);
        }
        PhaseOutcome {
            assistant_text: partial_text,
            messages_appended: appended,
            usage,
            status: PhaseRunStatus::Interrupted,
            error: Some(Error::SessionInterrupted),
        }
    }

    async fn publish_error(&self, message_id: Uuid, error: &Error) {
        let _ = self
            .events
            .publish(message_id, TYPE_ERROR, serde_json::json!({"kind": error.kind(), "message": error.to_string()}))
            .await;
    }

    /// Retry a round's LLM call up to `llm_retries` times on a
    /// transport-level failure, using the same exponential-backoff
    /// policy `ao-tools::ScopedDispatcher` uses for tool retries.
    async fn run_round_with_retry(
        &self,
        phase: &str,
        req: &ChatRequest,
        session_id: Uuid,
        message_id: Uuid,
        cancel: &CancelHandle,
    ) -> RoundOutcome {
        let mut attempt = 0u32;
        loop {
            match self.run_round(phase, req, session_id, message_id, cancel).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    let retryable = matches!(e, Error::TransportError(_) | Error::Timeout(_));
                    if !retryable || attempt >= self.llm_retries {
                        return RoundOutcome::Err(e);
                    }
                    let backoff_ms = LLM_BASE_BACKOFF_MS * (1u64 << attempt);
                    tokio::time::sleep(Duration::from_millis(jittered(backoff_ms))).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_round(
        &self,
        _phase: &str,
        req: &ChatRequest,
        session_id: Uuid,
        message_id: Uuid,
        cancel: &CancelHandle,
    ) -> Result<RoundOutcome> {
        let mut stream = self.provider.chat_stream(req).await?;
        let mut text_buf = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut round_usage: Option<Usage> = None;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok(RoundOutcome::Interrupted { partial_text: text_buf });
            }
            match event? {
                StreamEvent::Token { text } => {
                    let _ = self
                        .events
                        .publish(message_id, TYPE_MESSAGE, serde_json::json!({"kind": "token", "text": text}))
                        .await;
                    text_buf.push_str(&text);
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    let _ = self
                        .events
                        .publish(
                            message_id,
                            TYPE_MESSAGE,
                            serde_json::json!({"kind": "tool_call_started", "call_id": call_id, "tool_name": tool_name}),
                        )
                        .await;
                }
                StreamEvent::ToolCallDelta { .. } => {}
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    let _ = self
                        .events
                        .publish(
                            message_id,
                            TYPE_MESSAGE,
                            serde_json::json!({"kind": "tool_call_finished", "call_id": call_id, "tool_name": tool_name, "arguments": arguments}),
                        )
                        .await;
                    tool_calls.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                        status: ao_domain::tool::ToolCallStatus::Dispatched,
                    });
                }
                StreamEvent::Done { usage, .. } => {
                    round_usage = usage;
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Upstream {
                        provider: self.provider.provider_id().to_string(),
                        message,
                    });
                }
            }
        }

        let _ = session_id;
        Ok(RoundOutcome::Ok(RawRound {
            text: text_buf,
            tool_calls,
            usage: round_usage,
        }))
    }

    /// Tool-call arguments that fail to parse as a JSON object are
    /// malformed. Repaired once per round by re-prompting the model with a
    /// schema reminder; still-malformed calls after the repair attempt fail
    /// the phase.
    async fn repair_malformed_calls(
        &self,
        phase: &str,
        tool_calls: Vec<ToolCall>,
        history: &mut Vec<Message>,
        session_id: Uuid,
        cancel: &CancelHandle,
    ) -> Result<Vec<ToolCall>> {
        if !tool_calls.iter().any(|c| !c.arguments.is_object()) {
            return Ok(tool_calls);
        }

        let malformed: Vec<&str> = tool_calls
            .iter()
            .filter(|c| !c.arguments.is_object())
            .map(|c| c.tool_name.as_str())
            .collect();
        history.push(Message::system(
            session_id,
            format!(
                "Tool call argument(s) for {} were not a valid JSON object. Re-emit the call with `arguments` as a JSON object matching the tool's parameter schema.",
                malformed.join(", ")
            ),
        ));

        let req = ChatRequest {
            messages: history.clone(),
            tools: vec![],
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model: None,
        };
        let message_id = Uuid::new_v4();
        let repaired = match self.run_round(phase, &req, session_id, message_id, cancel).await {
            Ok(RoundOutcome::Ok(r)) => r.tool_calls,
            _ => Vec::new(),
        };

        if repaired.iter().any(|c| !c.arguments.is_object()) || repaired.is_empty() {
            return Err(Error::PhaseFailed {
                phase: phase.to_string(),
                message: "tool call arguments remained malformed after one repair attempt".to_string(),
            });
        }
        Ok(repaired)
    }
}

struct RawRound {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

enum RoundOutcome {
    Ok(RawRound),
    Interrupted { partial_text: String },
    Err(Error),
}

fn wrap_phase_failed(phase: &str, error: Error) -> Error {
    match error {
        Error::PhaseFailed { .. } | Error::ToolLoopExceeded { .. } => error,
        other => Error::PhaseFailed {
            phase: phase.to_string(),
            message: other.to_string(),
        },
    }
}

/// Apply +/-20% jitter to a backoff duration, mirroring
/// `ao-tools::ScopedDispatcher`'s deterministic jitter.
fn jittered(base_ms: u64) -> u64 {
    let variance = (base_ms as f64 * 0.2) as i64;
    let seed = (base_ms as i64) % (variance.max(1) * 2 + 1);
    let offset = seed - variance;
    (base_ms as i64 + offset).max(0) as u64
}

fn result_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

trait UsageExt {
    fn default_zero() -> Self;
    fn add(&self, other: &Usage) -> Usage;
}

impl UsageExt for Usage {
    fn default_zero() -> Self {
        Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }
    fn add(&self, other: &Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::config::ToolPolicy;
    use ao_providers::MockProvider;
    use ao_tools::ToolRegistry;

    fn dispatcher() -> Arc<ScopedDispatcher> {
        let registry = Arc::new(ToolRegistry::new());
        Arc::new(registry.view(ToolPolicy::default()))
    }

    #[tokio::test]
    async fn phase_without_tool_calls_returns_single_round() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("mock"));
        let session_id = Uuid::new_v4();
        let (bus, mut rx) = EventBus::new(session_id);
        let runner = PhaseRunner::new(provider, dispatcher(), bus);
        let cancel = CancelHandle::new();

        let outcome = runner
            .run(
                "router",
                session_id,
                vec![Message::user(session_id, "hi")],
                vec![],
                &cancel,
                false,
                &ModelOverride::default(),
            )
            .await;

        assert_eq!(outcome.status, PhaseRunStatus::Completed);
        assert_eq!(outcome.messages_appended.len(), 1);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let _ = outcome.assistant_text;
    }

    #[tokio::test]
    async fn interrupted_session_flushes_partial_and_returns_interrupted() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("mock"));
        let session_id = Uuid::new_v4();
        let (bus, _rx) = EventBus::new(session_id);
        let runner = PhaseRunner::new(provider, dispatcher(), bus);
        let cancel = CancelHandle::new();
        cancel.cancel();

        let outcome = runner
            .run(
                "router",
                session_id,
                vec![Message::user(session_id, "hi")],
                vec![],
                &cancel,
                false,
                &ModelOverride::default(),
            )
            .await;
        assert_eq!(outcome.status, PhaseRunStatus::Interrupted);
        assert!(matches!(outcome.error, Some(Error::SessionInterrupted)));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let base = 400u64;
        let j = jittered(base);
        let variance = (base as f64 * 0.2) as u64;
        assert!(j >= base.saturating_sub(variance) && j <= base + variance);
    }
}
