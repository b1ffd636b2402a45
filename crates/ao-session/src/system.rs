//! Fixed, run-start-supplied context: the system prompt prefix, the
//! owning agent id, and any caller-supplied key/value pairs phases may
//! read but never mutate.

use std::collections::HashMap;

pub struct SystemContext {
    pub agent_id: String,
    pub system_prefix: String,
    values: HashMap<String, String>,
}

impl SystemContext {
    pub fn new(agent_id: impl Into<String>, system_prefix: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            system_prefix: system_prefix.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_values(mut self, values: HashMap<String, String>) -> Self {
        self.values = values;
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_round_trip() {
        let mut ctx = SystemContext::new("agent-1", "You are a helpful assistant.");
        ctx.set("locale", "en-US");
        assert_eq!(ctx.get("locale"), Some("en-US"));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn with_values_seeds_initial_map() {
        let mut values = HashMap::new();
        values.insert("tz".to_string(), "UTC".to_string());
        let ctx = SystemContext::new("agent-1", "prefix").with_values(values);
        assert_eq!(ctx.get("tz"), Some("UTC"));
    }
}
