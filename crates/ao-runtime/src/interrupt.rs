//! Process-global registry of cancellation handles for in-flight runs.
//!
//! A handle is registered when a run starts streaming and removed once its
//! `stream_end` frame is published. `POST /v1/sessions/{id}/interrupt`
//! looks the session up here, not in [`ao_session::SessionRegistry`] — a
//! session can be resident with no run currently in flight.
//!
//! Sub-agent calls (`ToolKind::AgentTool`) register their session under
//! the parent run's group so a parent interrupt cascades to any children
//! it spawned.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InterruptRegistry {
    handles: Mutex<HashMap<Uuid, CancelHandle>>,
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Register a cancellation handle for a starting run. Replaces any
    /// stale handle left over from a prior run on the same session.
    pub fn register(&self, session_id: Uuid) -> CancelHandle {
        let handle = CancelHandle::new();
        self.handles.lock().insert(session_id, handle.clone());
        handle
    }

    /// Request cancellation of `session_id`'s in-flight run, cascading to
    /// any sub-agent sessions grouped under it. Returns `true` if a
    /// handle was found.
    pub fn interrupt(&self, session_id: Uuid) -> bool {
        let found = if let Some(handle) = self.handles.lock().get(&session_id) {
            handle.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(&session_id) {
            let handles = self.handles.lock();
            for child in children {
                if let Some(child_handle) = handles.get(child) {
                    child_handle.cancel();
                }
            }
        }

        found
    }

    /// Remove the handle once the run's `stream_end` frame is published.
    pub fn remove(&self, session_id: Uuid) {
        self.handles.lock().remove(&session_id);
        self.groups.lock().remove(&session_id);
    }

    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.handles.lock().contains_key(&session_id)
    }

    pub fn add_to_group(&self, parent: Uuid, child: Uuid) {
        self.groups.lock().entry(parent).or_default().insert(child);
    }
}

impl Default for InterruptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_interrupt_cancels_handle() {
        let registry = InterruptRegistry::new();
        let id = Uuid::new_v4();
        let handle = registry.register(id);
        assert!(registry.interrupt(id));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn interrupt_unknown_session_returns_false() {
        let registry = InterruptRegistry::new();
        assert!(!registry.interrupt(Uuid::new_v4()));
    }

    #[test]
    fn remove_clears_handle_and_group() {
        let registry = InterruptRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id);
        registry.remove(id);
        assert!(!registry.is_running(id));
        assert!(!registry.interrupt(id));
    }

    #[test]
    fn interrupt_cascades_to_grouped_children() {
        let registry = InterruptRegistry::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        registry.register(parent);
        let child_handle = registry.register(child);
        registry.add_to_group(parent, child);

        registry.interrupt(parent);
        assert!(child_handle.is_cancelled());
    }
}
