//! `SessionContext` — everything a running session owns in memory.

use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::tool::Message;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::message::MessageManager;
use crate::system::SystemContext;
use crate::task_manager::TaskManager;
use crate::token_accounting::TokenAccounting;
use crate::workflow::WorkflowManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Succeeded,
    Failed,
    Interrupted,
}

/// Owns the message log, task map, workflow state, system context, an
/// optional user-memory handle, cumulative token accounting, and a
/// cancellation handle for cooperative interruption. Exists only for the
/// lifetime of the process — nothing here is ever written to disk.
pub struct SessionContext {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: parking_lot::Mutex<DateTime<Utc>>,
    pub status: parking_lot::Mutex<SessionStatus>,

    pub messages: parking_lot::Mutex<MessageManager>,
    pub tasks: parking_lot::Mutex<TaskManager>,
    pub workflow: parking_lot::Mutex<WorkflowManager>,
    pub system: SystemContext,
    pub tokens: parking_lot::Mutex<TokenAccounting>,

    /// Facts extracted by the MemoryExtractor for this session, if a
    /// memory handle was configured for the run. Out of scope: the store
    /// itself lives outside this runtime; this is just a relay buffer.
    pub memory_handle: Option<String>,

    cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(session_id: Uuid, system: SystemContext, memory_handle: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_active_at: parking_lot::Mutex::new(now),
            status: parking_lot::Mutex::new(SessionStatus::Active),
            messages: parking_lot::Mutex::new(MessageManager::new()),
            tasks: parking_lot::Mutex::new(TaskManager::new()),
            workflow: parking_lot::Mutex::new(WorkflowManager::new()),
            system,
            tokens: parking_lot::Mutex::new(TokenAccounting::new()),
            memory_handle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn touch(&self) {
        *self.last_active_at.lock() = Utc::now();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - *self.last_active_at.lock()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    /// Signal cooperative cancellation; `PhaseRunner` checkpoints observe
    /// this via [`Self::cancellation_token`].
    pub fn interrupt(&self) {
        self.cancel.cancel();
        self.set_status(SessionStatus::Interrupted);
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// In-memory registry of all resident sessions, with idle eviction.
pub struct SessionRegistry {
    sessions: parking_lot::RwLock<HashMap<Uuid, Arc<SessionContext>>>,
    idle_minutes: Option<u32>,
    max_resident: usize,
}

impl SessionRegistry {
    pub fn new(idle_minutes: Option<u32>, max_resident: usize) -> Self {
        Self {
            sessions: parking_lot::RwLock::new(HashMap::new()),
            idle_minutes,
            max_resident,
        }
    }

    /// Fetch the resident session for `session_id`, or create one with
    /// `system()` and `memory_handle` if absent. `memory_handle` is only
    /// consulted on creation — an existing session keeps whatever handle it
    /// was created with.
    pub fn get_or_create(
        &self,
        session_id: Uuid,
        system: impl FnOnce() -> SystemContext,
        memory_handle: Option<String>,
    ) -> Arc<SessionContext> {
        if let Some(existing) = self.sessions.read().get(&session_id) {
            existing.touch();
            return existing.clone();
        }
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&session_id) {
            existing.touch();
            return existing.clone();
        }
        self.evict_if_over_capacity(&mut sessions);
        let ctx = Arc::new(SessionContext::new(session_id, system(), memory_handle));
        sessions.insert(session_id, ctx.clone());
        ctx
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<SessionContext>> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn remove(&self, session_id: Uuid) -> Option<Arc<SessionContext>> {
        self.sessions.write().remove(&session_id)
    }

    /// Evict sessions idle longer than `idle_minutes`. No-op if idle
    /// eviction is disabled.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Some(idle_minutes) = self.idle_minutes else {
            return 0;
        };
        let limit = chrono::Duration::minutes(idle_minutes as i64);
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, ctx| ctx.idle_for(now) < limit);
        before - sessions.len()
    }

    fn evict_if_over_capacity(&self, sessions: &mut HashMap<Uuid, Arc<SessionContext>>) {
        if sessions.len() < self.max_resident {
            return;
        }
        if let Some(oldest_id) = sessions
            .iter()
            .min_by_key(|(_, ctx)| *ctx.last_active_at.lock())
            .map(|(id, _)| *id)
        {
            sessions.remove(&oldest_id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append a turn's messages and return the bounded history view for the
/// next LLM call, convenience wrapper over the pieces `SessionContext` owns.
pub fn append_and_history(ctx: &SessionContext, msg: Message, phase: &str, budget_tokens: u32) -> Vec<Message> {
    let mut messages = ctx.messages.lock();
    messages.append(msg);
    messages.history_for(phase, budget_tokens)
}
