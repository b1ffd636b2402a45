//! Holds the workflow (if any) selected for a session.
//!
//! A workflow is supplied as input at run start and never mutates during
//! the session; only which step is "current" advances, tracked separately
//! by the Controller via `current_stage`.

use ao_domain::task::Workflow;

pub struct WorkflowManager {
    active: Option<Workflow>,
    current_stage: usize,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self {
            active: None,
            current_stage: 0,
        }
    }

    pub fn select(&mut self, workflow: Workflow) {
        self.active = Some(workflow);
        self.current_stage = 0;
    }

    pub fn active(&self) -> Option<&Workflow> {
        self.active.as_ref()
    }

    pub fn current_stage(&self) -> Option<&ao_domain::task::WorkflowStep> {
        self.active.as_ref().and_then(|w| w.steps.get(self.current_stage))
    }

    /// Advance to the next top-level step. Returns false if already at
    /// the last step (or no workflow is active).
    pub fn advance(&mut self) -> bool {
        match &self.active {
            Some(w) if self.current_stage + 1 < w.steps.len() => {
                self.current_stage += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.active {
            Some(w) => self.current_stage + 1 >= w.steps.len(),
            None => true,
        }
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Above this many candidates the Controller must run a `WorkflowSelect`
/// phase instead of defaulting to the first-listed workflow.
pub const WORKFLOW_SELECT_THRESHOLD: usize = 5;

/// Whether a run with `candidate_count` available workflows needs an
/// explicit `WorkflowSelect` phase rather than the first-listed fallback.
pub fn needs_explicit_select(candidate_count: usize) -> bool {
    candidate_count > WORKFLOW_SELECT_THRESHOLD
}

/// Resolve which workflow a turn uses. `chosen_id`, when present, names the
/// id a `WorkflowSelect` phase picked; when absent (the gate was skipped or
/// the model's answer didn't match any candidate), the first-listed
/// candidate wins.
pub fn resolve_candidate(candidates: &[(String, Workflow)], chosen_id: Option<&str>) -> Option<Workflow> {
    if let Some(id) = chosen_id {
        if let Some((_, workflow)) = candidates.iter().find(|(cid, _)| cid == id) {
            return Some(workflow.clone());
        }
    }
    candidates.first().map(|(_, workflow)| workflow.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::task::WorkflowStep;

    fn sample() -> Workflow {
        Workflow {
            workflow_id: "wf1".into(),
            name: "deploy".into(),
            steps: vec![
                WorkflowStep {
                    name: "build".into(),
                    instruction: None,
                    sub_steps: vec![],
                },
                WorkflowStep {
                    name: "ship".into(),
                    instruction: None,
                    sub_steps: vec![],
                },
            ],
            category: None,
            tags: vec![],
            enabled: true,
        }
    }

    #[test]
    fn no_workflow_selected_is_complete() {
        let mgr = WorkflowManager::new();
        assert!(mgr.is_complete());
        assert!(mgr.current_stage().is_none());
    }

    #[test]
    fn select_resets_to_first_stage() {
        let mut mgr = WorkflowManager::new();
        mgr.select(sample());
        assert_eq!(mgr.current_stage().unwrap().name, "build");
        assert!(!mgr.is_complete());
    }

    #[test]
    fn advance_moves_through_all_stages_then_stops() {
        let mut mgr = WorkflowManager::new();
        mgr.select(sample());
        assert!(mgr.advance());
        assert_eq!(mgr.current_stage().unwrap().name, "ship");
        assert!(mgr.is_complete());
        assert!(!mgr.advance());
    }

    #[test]
    fn select_gate_skipped_at_or_below_threshold() {
        assert!(!needs_explicit_select(5));
        assert!(needs_explicit_select(6));
    }

    fn named(id: &str) -> Workflow {
        Workflow { workflow_id: id.into(), ..sample() }
    }

    #[test]
    fn resolve_candidate_picks_chosen_id() {
        let candidates = vec![("a".to_string(), named("a")), ("b".to_string(), named("b"))];
        let resolved = resolve_candidate(&candidates, Some("b"));
        assert_eq!(resolved.unwrap().workflow_id, "b");
    }

    #[test]
    fn resolve_candidate_falls_back_to_first_listed_when_no_choice() {
        let candidates = vec![("a".to_string(), named("a")), ("b".to_string(), named("b"))];
        let resolved = resolve_candidate(&candidates, None);
        assert_eq!(resolved.unwrap().workflow_id, "a");
    }

    #[test]
    fn resolve_candidate_falls_back_to_first_listed_on_unknown_id() {
        let candidates = vec![("a".to_string(), named("a")), ("b".to_string(), named("b"))];
        let resolved = resolve_candidate(&candidates, Some("nope"));
        assert_eq!(resolved.unwrap().workflow_id, "a");
    }

    #[test]
    fn resolve_candidate_none_when_empty() {
        assert!(resolve_candidate(&[], None).is_none());
    }
}
