//! The phase graph orchestrator.
//!
//! `HistoryPrep` appends the turn's ingress messages. `WorkflowSelect`
//! runs only when more than [`ao_session::WORKFLOW_SELECT_THRESHOLD`]
//! workflows are offered; otherwise the first-listed one wins. `Router`
//! runs only when the caller didn't pin both `deep_thinking` and
//! `multi_agent` explicitly, and its structured verdict resolves
//! whichever of the two the caller left open. `Analysis` runs when
//! `deep_thinking` is true, independent of which subgraph follows.
//!
//! A `multi_agent` turn decomposes into tasks and drives up to
//! `tasks.max_concurrent` incomplete ones at a time through `Plan ->
//! Execute -> Observe -> Judge -> StageSummary`, bounded by
//! `max_loop_count` rounds; a `PhaseFailed`/`ToolLoopExceeded` from
//! inside a task's cycle fails that task and the round continues rather
//! than failing the turn.
//! A non-`multi_agent` turn runs `SkillExecute` (falling back to
//! `SimpleReply`). `Suggest` runs last, gated on `more_suggest`, and is
//! best-effort: its failure never fails the turn.

use std::sync::Arc;

use ao_domain::config::Config;
use ao_domain::error::{Error, Result};
use ao_domain::stream::Usage;
use ao_domain::task::{TaskStatus, Workflow};
use ao_domain::tool::{Message, ToolDefinition};
use ao_events::{EventBus, StreamEndReason, TYPE_MESSAGE};
use ao_providers::ProviderRegistry;
use ao_session::SessionContext;
use ao_tools::ScopedDispatcher;
use serde::Deserialize;
use uuid::Uuid;

use crate::interrupt::CancelHandle;
use crate::memory_extractor::MemoryExtractor;
use crate::phase_runner::{ModelOverride, PhaseOutcome, PhaseRunStatus, PhaseRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WorkflowSelect,
    Router,
    Analysis,
    Decompose,
    Plan,
    Execute,
    Observe,
    Judge,
    StageSummary,
    Summary,
    Suggest,
    SkillExecute,
    SimpleReply,
}

impl Phase {
    pub fn role_name(self) -> &'static str {
        match self {
            Phase::WorkflowSelect => "workflow_select",
            Phase::Router => "router",
            Phase::Analysis => "analysis",
            Phase::Decompose => "decompose",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Observe => "observe",
            Phase::Judge => "judge",
            Phase::StageSummary => "stage_summary",
            Phase::Summary => "summary",
            Phase::Suggest => "suggest",
            Phase::SkillExecute => "skill_execute",
            Phase::SimpleReply => "simple_reply",
        }
    }

    /// Phases whose output the Controller parses as structured JSON
    /// rather than reading as free text.
    fn wants_json(self) -> bool {
        matches!(self, Phase::Router | Phase::Judge)
    }
}

/// Everything an ingress call can pin down for a turn. Fields left
/// `None`/empty fall back to config defaults or trigger the
/// corresponding gate phase.
pub struct RunTurnRequest {
    pub messages: Vec<Message>,
    pub deep_thinking: Option<bool>,
    pub multi_agent: Option<bool>,
    pub more_suggest: bool,
    pub max_loop_count: Option<u32>,
    pub available_workflows: Vec<(String, Workflow)>,
    pub model_override: ModelOverride,
}

pub struct Controller {
    pub providers: Arc<ProviderRegistry>,
    pub dispatcher: Arc<ScopedDispatcher>,
    pub events: EventBus,
    pub config: Arc<Config>,
    pub memory_extractor: Arc<MemoryExtractor>,
    pub round_bound: u32,
}

pub struct TurnResult {
    pub reply_text: String,
    pub usage: Usage,
}

impl Controller {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        dispatcher: Arc<ScopedDispatcher>,
        events: EventBus,
        config: Arc<Config>,
        memory_extractor: Arc<MemoryExtractor>,
    ) -> Self {
        Self {
            providers,
            dispatcher,
            events,
            config,
            memory_extractor,
            round_bound: crate::phase_runner::DEFAULT_ROUND_BOUND,
        }
    }

    fn runner_for(&self, phase: Phase) -> Result<PhaseRunner> {
        let provider = self
            .providers
            .for_role(phase.role_name())
            .or_else(|| self.providers.for_role("default"))
            .ok_or_else(|| Error::Config(format!("no LLM provider assigned to role '{}'", phase.role_name())))?;
        let mut runner = PhaseRunner::new(provider, self.dispatcher.clone(), self.events.clone());
        runner.round_bound = self.round_bound;
        runner.llm_retries = self.config.llm.max_retries;
        Ok(runner)
    }

    /// Run one full turn against `session`, from the ingress request
    /// through to a final reply. Always publishes a terminating
    /// `stream_end` frame, even on failure or interruption, and always
    /// hands the transcript to the memory extractor afterward.
    pub async fn run_turn(
        &self,
        session: &Arc<SessionContext>,
        request: RunTurnRequest,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
    ) -> Result<TurnResult> {
        let result = self.run_turn_inner(session, request, tool_defs, cancel).await;

        let (reason, usage) = match &result {
            Ok(turn) => (StreamEndReason::Completed, turn.usage.clone()),
            Err(Error::SessionInterrupted) => {
                self.annotate_interruption(session).await;
                (StreamEndReason::Interrupted, session.tokens.lock().as_usage())
            }
            Err(e) => {
                self.annotate_failure(session, e).await;
                (StreamEndReason::Failed, session.tokens.lock().as_usage())
            }
        };
        let _ = self.events.stream_end(reason, usage).await;
        self.maybe_extract_memory(session).await;

        result
    }

    async fn run_turn_inner(
        &self,
        session: &Arc<SessionContext>,
        request: RunTurnRequest,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
    ) -> Result<TurnResult> {
        let turn_id = Uuid::new_v4();
        let model_override = request.model_override.clone();

        {
            let mut mgr = session.messages.lock();
            for msg in request.messages {
                mgr.append(msg);
            }
        }

        self.maybe_select_workflow(session, turn_id, &request.available_workflows, cancel, &model_override)
            .await?;

        let (deep_thinking, multi_agent) = self
            .resolve_route(session, turn_id, &request, cancel, &model_override)
            .await?;

        if deep_thinking {
            let history = self.history_for(session, Phase::Analysis);
            self.run_phase(Phase::Analysis, session, turn_id, history, vec![], cancel, &model_override)
                .await?;
        }

        let max_loop_count = request.max_loop_count.unwrap_or(self.config.tasks.max_loop_count).max(1);
        let reply_text = if multi_agent {
            self.run_complex_path(session, turn_id, tool_defs.clone(), cancel, max_loop_count, &model_override)
                .await?
        } else {
            self.run_simple_path(session, turn_id, tool_defs.clone(), cancel, &model_override).await?
        };

        if request.more_suggest {
            let history = self.history_for(session, Phase::Suggest);
            let _ = self
                .run_phase(Phase::Suggest, session, turn_id, history, vec![], cancel, &model_override)
                .await;
        }

        session.set_status(ao_session::SessionStatus::Succeeded);
        Ok(TurnResult {
            reply_text,
            usage: session.tokens.lock().as_usage(),
        })
    }

    /// `Router?`: skipped entirely when the caller already pinned both
    /// flags. Otherwise runs Router and resolves whichever of the two
    /// the caller left open from its structured verdict (`"auto"`
    /// resolves to `false` on both axes).
    async fn resolve_route(
        &self,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        request: &RunTurnRequest,
        cancel: &CancelHandle,
        model_override: &ModelOverride,
    ) -> Result<(bool, bool)> {
        if let (Some(deep), Some(multi)) = (request.deep_thinking, request.multi_agent) {
            return Ok((deep, multi));
        }

        let history = self.history_for(session, Phase::Router);
        let route = self
            .run_phase(Phase::Router, session, turn_id, history, vec![], cancel, model_override)
            .await?;
        let parsed: RouterDecision = serde_json::from_str(&route.assistant_text).unwrap_or_default();

        let router_deep = parsed.deep_thinking.as_ref().map(RouteFlag::resolve).unwrap_or(false);
        let router_multi = parsed
            .multi_agent
            .as_ref()
            .map(RouteFlag::resolve)
            .unwrap_or_else(|| fallback_multi_agent(&route.assistant_text));

        Ok((
            request.deep_thinking.unwrap_or(router_deep),
            request.multi_agent.unwrap_or(router_multi),
        ))
    }

    /// `WorkflowSelect?`: only asked above
    /// [`ao_session::WORKFLOW_SELECT_THRESHOLD`] candidates; below that
    /// (or on an unparseable answer) the first-listed workflow wins.
    async fn maybe_select_workflow(
        &self,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        available: &[(String, Workflow)],
        cancel: &CancelHandle,
        model_override: &ModelOverride,
    ) -> Result<()> {
        if available.is_empty() {
            return Ok(());
        }

        let chosen_id = if ao_session::needs_explicit_select(available.len()) {
            let mut history = self.history_for(session, Phase::WorkflowSelect);
            let ids: Vec<&str> = available.iter().map(|(id, _)| id.as_str()).collect();
            history.push(Message::system(
                session.session_id,
                format!("Choose the best-fitting workflow id for this request from: {}. Reply with only the id.", ids.join(", ")),
            ));
            let selection = self
                .run_phase(Phase::WorkflowSelect, session, turn_id, history, vec![], cancel, model_override)
                .await?;
            parse_workflow_choice(&selection.assistant_text, available)
        } else {
            None
        };

        if let Some(workflow) = ao_session::resolve_candidate(available, chosen_id.as_deref()) {
            session.workflow.lock().select(workflow);
        }
        Ok(())
    }

    async fn run_simple_path(
        &self,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
        model_override: &ModelOverride,
    ) -> Result<String> {
        // SkillExecute runs first when a matching local/remote tool can
        // satisfy the request directly; falls through to SimpleReply if
        // no tool call results.
        let history = self.history_for(session, Phase::SkillExecute);
        let skill_attempt = self
            .run_phase(Phase::SkillExecute, session, turn_id, history, tool_defs, cancel, model_override)
            .await?;

        if !skill_attempt.assistant_text.trim().is_empty() {
            return Ok(skill_attempt.assistant_text);
        }

        let history = self.history_for(session, Phase::SimpleReply);
        let reply = self
            .run_phase(Phase::SimpleReply, session, turn_id, history, vec![], cancel, model_override)
            .await?;
        Ok(reply.assistant_text)
    }

    async fn run_complex_path(
        &self,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
        max_loop_count: u32,
        model_override: &ModelOverride,
    ) -> Result<String> {
        let history = self.history_for(session, Phase::Decompose);
        let decomposition = self
            .run_phase(Phase::Decompose, session, turn_id, history, vec![], cancel, model_override)
            .await?;
        self.seed_tasks(session, &decomposition.assistant_text);

        let max_concurrent = self.config.tasks.clamped().max_concurrent;
        for _ in 0..max_loop_count {
            if cancel.is_cancelled() {
                return Err(Error::SessionInterrupted);
            }
            let targets: Vec<Uuid> = {
                let mut tasks = session.tasks.lock();
                let picked: Vec<Uuid> = tasks
                    .all()
                    .iter()
                    .filter(|t| t.status.is_incomplete())
                    .take(max_concurrent)
                    .map(|t| t.task_id)
                    .collect();
                for id in &picked {
                    tasks.update_status(*id, TaskStatus::Running);
                }
                picked
            };
            if targets.is_empty() {
                break;
            }

            let cycles = targets
                .iter()
                .map(|target| self.run_task_cycle(session, turn_id, *target, tool_defs.clone(), cancel, model_override));
            let outcomes = futures_util::future::join_all(cycles).await;

            let mut first_turn_error = None;
            for (target, outcome) in targets.into_iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {}
                    Err(e) if is_task_scoped_failure(&e) => {
                        session.tasks.lock().update_status(target, TaskStatus::Failed);
                    }
                    Err(e) => {
                        if first_turn_error.is_none() {
                            first_turn_error = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = first_turn_error {
                return Err(e);
            }

            if !session.tasks.lock().any_incomplete() {
                break;
            }
        }

        if session.tasks.lock().any_incomplete() {
            session.messages.lock().append(Message::system(
                session.session_id,
                "loop bound reached with task(s) still incomplete; summarizing partial progress",
            ));
        }

        let history = self.history_for(session, Phase::Summary);
        let summary = self
            .run_phase(Phase::Summary, session, turn_id, history, vec![], cancel, model_override)
            .await?;
        Ok(summary.assistant_text)
    }

    /// One Plan -> Execute -> Observe -> Judge -> StageSummary cycle for
    /// `target`. `PhaseFailed`/`ToolLoopExceeded` from any of these
    /// phases propagate to the caller, which marks `target` failed and
    /// keeps the loop going; `SessionInterrupted` and anything else
    /// propagates further still, failing the turn.
    async fn run_task_cycle(
        &self,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        target: Uuid,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
        model_override: &ModelOverride,
    ) -> Result<()> {
        let history = self.history_for(session, Phase::Plan);
        self.run_phase(Phase::Plan, session, turn_id, history, vec![], cancel, model_override).await?;

        let history = self.history_for(session, Phase::Execute);
        self.run_phase(Phase::Execute, session, turn_id, history, tool_defs, cancel, model_override)
            .await?;

        let history = self.history_for(session, Phase::Observe);
        self.run_phase(Phase::Observe, session, turn_id, history, vec![], cancel, model_override)
            .await?;

        let history = self.history_for(session, Phase::Judge);
        let judge = self
            .run_phase(Phase::Judge, session, turn_id, history, vec![], cancel, model_override)
            .await?;
        let status = match parse_judge_verdict(&judge.assistant_text) {
            JudgeVerdict::Pass => TaskStatus::Completed,
            JudgeVerdict::Fail => TaskStatus::Failed,
            JudgeVerdict::Retry => TaskStatus::Running,
        };
        session.tasks.lock().update_status(target, status);

        // StageSummary is a TaskManager update, never a user-visible
        // message; best-effort, like Suggest.
        let history = self.history_for(session, Phase::StageSummary);
        if let Ok(stage) = self
            .run_phase(Phase::StageSummary, session, turn_id, history, vec![], cancel, model_override)
            .await
        {
            session.tasks.lock().set_summary(target, stage.assistant_text, vec![]);
        }
        Ok(())
    }

    fn history_for(&self, session: &Arc<SessionContext>, phase: Phase) -> Vec<Message> {
        session
            .messages
            .lock()
            .history_for(phase.role_name(), self.config.sessions.history_budget_tokens)
    }

    fn seed_tasks(&self, session: &Arc<SessionContext>, decomposition_text: &str) {
        let mut tasks = session.tasks.lock();
        let mut seeded = false;
        for line in decomposition_text.lines() {
            let trimmed = line.trim_start_matches(['-', '*', ' ']).trim();
            if trimmed.is_empty() {
                continue;
            }
            tasks.create(trimmed, trimmed, None);
            seeded = true;
        }
        if !seeded {
            tasks.create("complete the request", decomposition_text, None);
        }
    }

    async fn annotate_interruption(&self, session: &Arc<SessionContext>) {
        let msg = Message::assistant(session.session_id, "(task cancelled)");
        let message_id = msg.message_id;
        session.messages.lock().append(msg);
        let _ = self
            .events
            .publish(message_id, TYPE_MESSAGE, serde_json::json!({"kind": "task_cancelled"}))
            .await;
    }

    async fn annotate_failure(&self, session: &Arc<SessionContext>, error: &Error) {
        let msg = Message::assistant(session.session_id, format!("Sorry, something went wrong: {error}"));
        let message_id = msg.message_id;
        session.messages.lock().append(msg);
        let _ = self
            .events
            .publish(
                message_id,
                TYPE_MESSAGE,
                serde_json::json!({"kind": "failure_diagnostic", "error_kind": error.kind()}),
            )
            .await;
    }

    async fn maybe_extract_memory(&self, session: &Arc<SessionContext>) {
        if session.memory_handle.is_none() {
            return;
        }
        let transcript = session.messages.lock().all().to_vec();
        if transcript.is_empty() {
            return;
        }
        let _ = self
            .memory_extractor
            .run(session.session_id, session.memory_handle.as_deref(), &transcript)
            .await;
    }

    async fn run_phase(
        &self,
        phase: Phase,
        session: &Arc<SessionContext>,
        turn_id: Uuid,
        history: Vec<Message>,
        tool_defs: Vec<ToolDefinition>,
        cancel: &CancelHandle,
        model_override: &ModelOverride,
    ) -> Result<PhaseOutcome> {
        let session_id = session.session_id;
        let started = std::time::Instant::now();
        ao_domain::trace::TraceEvent::PhaseStarted {
            session_id: session_id.to_string(),
            turn_id: turn_id.to_string(),
            phase: phase.role_name().to_string(),
        }
        .emit();

        let runner = self.runner_for(phase)?;
        let outcome = runner
            .run(
                phase.role_name(),
                session_id,
                history,
                tool_defs,
                cancel,
                phase.wants_json(),
                model_override,
            )
            .await;

        for msg in &outcome.messages_appended {
            session.messages.lock().append(msg.clone());
        }
        session.tokens.lock().record(phase.role_name(), outcome.usage.clone());

        match outcome.status {
            PhaseRunStatus::Completed => {
                ao_domain::trace::TraceEvent::PhaseCompleted {
                    session_id: session_id.to_string(),
                    turn_id: turn_id.to_string(),
                    phase: phase.role_name().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    next_phase: None,
                }
                .emit();
                Ok(outcome)
            }
            PhaseRunStatus::Interrupted | PhaseRunStatus::Failed => {
                let error = outcome.error.unwrap_or_else(|| Error::PhaseFailed {
                    phase: phase.role_name().to_string(),
                    message: "phase ended without a reported error".to_string(),
                });
                ao_domain::trace::TraceEvent::PhaseFailed {
                    session_id: session_id.to_string(),
                    turn_id: turn_id.to_string(),
                    phase: phase.role_name().to_string(),
                    error_kind: error.kind().to_string(),
                    message: error.to_string(),
                }
                .emit();
                Err(error)
            }
        }
    }
}

/// `true` for the two errors a running multi-agent task cycle absorbs
/// by failing the current task instead of the whole turn.
fn is_task_scoped_failure(error: &Error) -> bool {
    matches!(error, Error::PhaseFailed { .. } | Error::ToolLoopExceeded { .. })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RouteFlag {
    Bool(bool),
    Auto(String),
}

impl RouteFlag {
    fn resolve(&self) -> bool {
        matches!(self, RouteFlag::Bool(true))
    }
}

#[derive(Debug, Deserialize, Default)]
struct RouterDecision {
    deep_thinking: Option<RouteFlag>,
    multi_agent: Option<RouteFlag>,
}

/// Last-resort fallback when Router's answer isn't parseable JSON at
/// all: the string-sniff this Controller used before it had a
/// structured contract.
fn fallback_multi_agent(assistant_text: &str) -> bool {
    assistant_text.to_lowercase().contains("complex")
}

enum JudgeVerdict {
    Pass,
    Fail,
    Retry,
}

#[derive(Debug, Deserialize)]
struct JudgeOutput {
    verdict: Option<String>,
}

fn parse_judge_verdict(text: &str) -> JudgeVerdict {
    if let Ok(parsed) = serde_json::from_str::<JudgeOutput>(text) {
        if let Some(verdict) = parsed.verdict {
            return match verdict.to_lowercase().as_str() {
                "fail" | "failed" => JudgeVerdict::Fail,
                "retry" => JudgeVerdict::Retry,
                _ => JudgeVerdict::Pass,
            };
        }
    }
    // Judge didn't return parseable JSON; fall back to a text heuristic
    // rather than optimistically marking the task complete.
    let lowered = text.to_lowercase();
    if lowered.contains("fail") || lowered.contains("incomplete") {
        JudgeVerdict::Fail
    } else {
        JudgeVerdict::Pass
    }
}

fn parse_workflow_choice(text: &str, candidates: &[(String, Workflow)]) -> Option<String> {
    let trimmed = text.trim();
    candidates
        .iter()
        .find(|(id, _)| id == trimmed)
        .or_else(|| candidates.iter().find(|(id, _)| trimmed.contains(id.as_str())))
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(id: &str) -> Workflow {
        Workflow {
            workflow_id: id.to_string(),
            name: id.to_string(),
            steps: Vec::new(),
            category: None,
            tags: Vec::new(),
            enabled: true,
        }
    }

    #[test]
    fn route_flag_only_explicit_true_resolves_true() {
        assert!(RouteFlag::Bool(true).resolve());
        assert!(!RouteFlag::Bool(false).resolve());
        assert!(!RouteFlag::Auto("auto".to_string()).resolve());
    }

    #[test]
    fn fallback_multi_agent_sniffs_complex() {
        assert!(fallback_multi_agent("This looks Complex, needs several steps"));
        assert!(!fallback_multi_agent("just a quick answer"));
    }

    #[test]
    fn is_task_scoped_failure_covers_phase_and_tool_loop_errors() {
        assert!(is_task_scoped_failure(&Error::PhaseFailed {
            phase: "execute".to_string(),
            message: "boom".to_string(),
        }));
        assert!(is_task_scoped_failure(&Error::ToolLoopExceeded { bound: 8 }));
        assert!(!is_task_scoped_failure(&Error::SessionInterrupted));
    }

    #[test]
    fn parse_judge_verdict_prefers_structured_json() {
        assert!(matches!(parse_judge_verdict("{\"verdict\": \"fail\"}"), JudgeVerdict::Fail));
        assert!(matches!(parse_judge_verdict("{\"verdict\": \"retry\"}"), JudgeVerdict::Retry));
        assert!(matches!(parse_judge_verdict("{\"verdict\": \"pass\"}"), JudgeVerdict::Pass));
    }

    #[test]
    fn parse_judge_verdict_falls_back_to_text_heuristic() {
        assert!(matches!(parse_judge_verdict("the task is incomplete"), JudgeVerdict::Fail));
        assert!(matches!(parse_judge_verdict("looks good, done"), JudgeVerdict::Pass));
    }

    #[test]
    fn parse_workflow_choice_matches_exact_id_first() {
        let candidates = vec![(workflow("refund").workflow_id.clone(), workflow("refund")), ("escalate".to_string(), workflow("escalate"))];
        assert_eq!(parse_workflow_choice("escalate", &candidates), Some("escalate".to_string()));
    }

    #[test]
    fn parse_workflow_choice_falls_back_to_substring_match() {
        let candidates = vec![("refund".to_string(), workflow("refund"))];
        assert_eq!(
            parse_workflow_choice("I'll use the refund workflow here", &candidates),
            Some("refund".to_string())
        );
    }

    #[test]
    fn parse_workflow_choice_none_when_nothing_matches() {
        let candidates = vec![("refund".to_string(), workflow("refund"))];
        assert_eq!(parse_workflow_choice("escalate to a human", &candidates), None);
    }
}
