use serde::Serialize;

/// Structured trace events emitted across all agentorch crates.
///
/// Every variant maps to a concrete component from the runtime's
/// architecture (ToolRegistry, SessionContext, EventStream, PhaseRunner,
/// Controller, InterruptRegistry, MemoryExtractor, Budget/TokenAccounting)
/// so a log pipeline can reconstruct a full run without re-deriving it
/// from free-text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    PhaseStarted {
        session_id: String,
        turn_id: String,
        phase: String,
    },
    PhaseCompleted {
        session_id: String,
        turn_id: String,
        phase: String,
        duration_ms: u64,
        next_phase: Option<String>,
    },
    PhaseFailed {
        session_id: String,
        turn_id: String,
        phase: String,
        error_kind: String,
        message: String,
    },
    ToolDispatched {
        session_id: String,
        call_id: String,
        tool_name: String,
    },
    ToolCompleted {
        session_id: String,
        call_id: String,
        tool_name: String,
        duration_ms: u64,
        ok: bool,
    },
    ToolLoopBoundHit {
        session_id: String,
        turn_id: String,
        rounds: u32,
    },
    BudgetWarning {
        session_id: String,
        used_tokens: u64,
        limit_tokens: u64,
    },
    BudgetExceeded {
        session_id: String,
        used_tokens: u64,
        limit_tokens: u64,
    },
    ChunkFramed {
        session_id: String,
        chunk_index: u32,
        bytes: usize,
    },
    EventDropped {
        session_id: String,
        reason: String,
    },
    InterruptObserved {
        session_id: String,
        turn_id: String,
        checkpoint: String,
    },
    MemoryExtracted {
        session_id: String,
        facts_extracted: usize,
        facts_deduped: usize,
        facts_contradicted: usize,
    },
    TranscriptAppend {
        session_id: String,
        lines: usize,
    },
    CompactionRun {
        session_id: String,
        turns_compacted: usize,
        summary_chars: usize,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ao_event");
    }
}
