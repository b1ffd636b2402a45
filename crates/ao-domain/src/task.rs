use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work created by the Decompose phase and mutated by the
/// Plan/Execute/Observe/Judge phases. Never deleted in-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub task_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_summary: Option<ExecutionSummary>,
    /// `None` for a top-level task.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub children: Vec<Uuid>,
}

impl Task {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            execution_summary: None,
            parent_id: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// A task tree invariant: a parent is `Completed` only when all
    /// children are `Completed` or `Skipped`.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    pub fn is_incomplete(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub result_summary: String,
    #[serde(default)]
    pub result_documents: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named ordered list of steps (with sub-steps) supplied as input to a
/// run. Once selected for a session, the active workflow influences
/// Plan-phase prompts but never mutates during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub sub_steps: Vec<WorkflowStep>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending() {
        let t = Task::new("decompose", "break the request into steps");
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.children.is_empty());
    }

    #[test]
    fn completed_and_skipped_are_terminal_success() {
        assert!(TaskStatus::Completed.is_terminal_success());
        assert!(TaskStatus::Skipped.is_terminal_success());
        assert!(!TaskStatus::Failed.is_terminal_success());
    }

    #[test]
    fn pending_and_running_are_incomplete() {
        assert!(TaskStatus::Pending.is_incomplete());
        assert!(TaskStatus::Running.is_incomplete());
        assert!(!TaskStatus::Completed.is_incomplete());
    }
}
