use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle settings for in-memory `SessionContext` instances.
///
/// Sessions live only for the lifetime of the process — there is no
/// cross-restart persistence — so the knobs here govern idle eviction
/// and per-session history bounds rather than any durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle timeout in minutes before a session is evicted from memory.
    /// `None` disables idle eviction (sessions live until process exit).
    #[serde(default = "d_idle_minutes")]
    pub idle_minutes: Option<u32>,

    /// Maximum number of concurrently resident sessions. Oldest-idle is
    /// evicted first when the limit is reached.
    #[serde(default = "d_max_sessions")]
    pub max_resident: usize,

    /// Token budget for a single session's message history before
    /// `MessageManager::history_for` starts truncating.
    #[serde(default = "d_history_tokens")]
    pub history_budget_tokens: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_minutes: d_idle_minutes(),
            max_resident: d_max_sessions(),
            history_budget_tokens: d_history_tokens(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_idle_minutes() -> Option<u32> {
    Some(120)
}
fn d_max_sessions() -> usize {
    10_000
}
fn d_history_tokens() -> u32 {
    32_000
}
