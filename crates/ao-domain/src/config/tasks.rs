use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task queue configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session task queue settings: concurrency and the multi-agent
/// Plan/Execute/Observe/Judge loop bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum number of tasks that may execute concurrently within a
    /// single session.  Clamped to the range `1..=20`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Upper bound on Plan/Execute/Observe/Judge iterations the Controller
    /// drives per turn before it forces a Summary with a partial-completion
    /// note, regardless of how many tasks remain incomplete.
    #[serde(default = "default_max_loop_count")]
    pub max_loop_count: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_loop_count: default_max_loop_count(),
        }
    }
}

impl TaskConfig {
    /// Clamp `max_concurrent` to the allowed range `1..=20`.
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent: self.max_concurrent.clamp(1, 20),
            max_loop_count: self.max_loop_count,
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_loop_count() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_concurrent_is_five() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.max_concurrent, 5);
    }

    fn cfg_with_concurrent(max_concurrent: usize) -> TaskConfig {
        TaskConfig {
            max_concurrent,
            ..TaskConfig::default()
        }
    }

    #[test]
    fn clamp_below_min() {
        let cfg = cfg_with_concurrent(0);
        assert_eq!(cfg.clamped().max_concurrent, 1);
    }

    #[test]
    fn clamp_above_max() {
        let cfg = cfg_with_concurrent(100);
        assert_eq!(cfg.clamped().max_concurrent, 20);
    }

    #[test]
    fn clamp_within_range() {
        let cfg = cfg_with_concurrent(10);
        assert_eq!(cfg.clamped().max_concurrent, 10);
    }

    #[test]
    fn clamp_at_boundaries() {
        assert_eq!(cfg_with_concurrent(1).clamped().max_concurrent, 1);
        assert_eq!(cfg_with_concurrent(20).clamped().max_concurrent, 20);
    }

    #[test]
    fn clamp_preserves_max_loop_count() {
        let cfg = TaskConfig {
            max_concurrent: 0,
            max_loop_count: 4,
        };
        assert_eq!(cfg.clamped().max_loop_count, 4);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = cfg_with_concurrent(8);
        let json = serde_json::to_string(&cfg).unwrap();
        let deserialized: TaskConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.max_concurrent, 8);
    }

    #[test]
    fn deserialize_missing_field_uses_default() {
        let json = "{}";
        let cfg: TaskConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_concurrent, 5);
        assert_eq!(cfg.max_loop_count, 10);
    }

    #[test]
    fn default_max_loop_count_is_ten() {
        assert_eq!(TaskConfig::default().max_loop_count, 10);
    }
}
