use std::sync::Arc;

use ao_domain::config::Config;
use ao_events::EventBus;
use ao_providers::ProviderRegistry;
use ao_session::SessionRegistry;
use ao_tools::ToolRegistry;
use uuid::Uuid;

use crate::interrupt::InterruptRegistry;
use crate::memory_extractor::MemoryExtractor;

/// Shared application state passed to every API handler and CLI command.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub interrupts: Arc<InterruptRegistry>,
    pub memory_extractor: Arc<MemoryExtractor>,
}

impl AppState {
    /// Open an event bus for a new run on `session_id` and register its
    /// cancellation handle with the interrupt registry.
    pub fn open_run(&self, session_id: Uuid) -> (EventBus, crate::interrupt::CancelHandle, ao_events::EventReceiver) {
        let (bus, rx) = EventBus::new(session_id);
        let cancel = self.interrupts.register(session_id);
        (bus, cancel, rx)
    }
}
