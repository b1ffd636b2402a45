//! Global tool registry and permission-scoped dispatch.
//!
//! Populated at startup from locally-implemented tools (exec, process,
//! file_ops) and any configured remote tool endpoints. The Controller
//! never talks to a tool directly — it asks the registry for a
//! [`ScopedDispatcher`] bound to an agent's allowed-tool set and invokes
//! through that.

use ao_domain::config::ToolPolicy;
use ao_domain::error::{Error, Result};
use ao_domain::tool::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a tool is reached, and the tier it occupies when two specs
/// registered under the same name are compared. On a name clash the
/// higher tier wins: remote-protocol > agent-tool > built-in-protocol >
/// local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Local,
    BuiltInProtocol,
    AgentTool,
    RemoteProtocol,
}

impl ToolKind {
    /// Default registration priority for this kind, used when the caller
    /// doesn't need a finer-grained priority within the tier.
    pub fn default_priority(self) -> u32 {
        match self {
            ToolKind::Local => 0,
            ToolKind::BuiltInProtocol => 10,
            ToolKind::AgentTool => 20,
            ToolKind::RemoteProtocol => 30,
        }
    }

    fn is_local(self) -> bool {
        matches!(self, ToolKind::Local)
    }
}

/// Implemented by every in-process tool (exec, process, file_ops, ...).
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Validate `args` against the tool's schema and run it, returning a
    /// JSON result or an application-level error (never retried).
    async fn call(&self, args: Value) -> Result<Value>;
}

/// A registered tool: its wire definition plus how to reach it.
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub priority: u32,
    pub kind: ToolKind,
    local: Option<Arc<dyn LocalTool>>,
}

impl ToolSpec {
    pub fn local(definition: ToolDefinition, priority: u32, handler: Arc<dyn LocalTool>) -> Self {
        Self {
            definition,
            priority,
            kind: ToolKind::Local,
            local: Some(handler),
        }
    }

    /// A tool reached over a remote transport — built-in-protocol,
    /// agent-tool, or remote-protocol per `kind`. No in-process handler;
    /// dispatch goes through whatever transport the caller wires in later.
    pub fn remote(definition: ToolDefinition, priority: u32, kind: ToolKind) -> Self {
        debug_assert!(!kind.is_local(), "use ToolSpec::local for in-process tools");
        Self {
            definition,
            priority,
            kind,
            local: None,
        }
    }
}

/// The outcome of a dispatched call, normalized to what the LLM sees.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    Ok(Value),
    Err { kind: &'static str, detail: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool spec. Fails with a `NameConflict` error unless the
    /// incoming spec's priority strictly exceeds the incumbent's.
    pub fn register(&mut self, name: impl Into<String>, spec: ToolSpec) -> Result<()> {
        let name = name.into();
        if let Some(existing) = self.tools.get(&name) {
            if spec.priority <= existing.priority {
                return Err(Error::InvalidArgs(format!(
                    "tool \"{name}\" already registered at priority {} \
                     (incoming priority {} does not exceed it)",
                    existing.priority, spec.priority
                )));
            }
        }
        self.tools.insert(name, spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|s| s.definition.clone()).collect()
    }

    /// Build a dispatcher scoped to `policy` — names/prefixes checked via
    /// the agent's `ToolPolicy` (deny evaluated before allow, case-insensitive,
    /// prefix-aware, `"*"` meaning "all names").
    pub fn view(self: &Arc<Self>, policy: ToolPolicy) -> ScopedDispatcher {
        ScopedDispatcher {
            registry: self.clone(),
            policy,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScopedDispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;

/// A permission-scoped gateway onto a [`ToolRegistry`]. Holds no tool
/// entities itself — every call re-checks the scope and looks the tool up
/// in the shared registry.
pub struct ScopedDispatcher {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
}

impl ScopedDispatcher {
    /// Invoke a tool by name. `deadline` bounds total wall time including
    /// retries; exceeding it surfaces as `Timeout`.
    pub async fn invoke(&self, name: &str, args: Value, deadline: Duration) -> InvokeOutcome {
        if !self.policy.allows(name) {
            return InvokeOutcome::Err {
                kind: "not_permitted",
                detail: format!("tool \"{name}\" is not permitted for this scope"),
            };
        }

        let spec = match self.registry.get(name) {
            Some(s) => s,
            None => {
                return InvokeOutcome::Err {
                    kind: "unknown",
                    detail: format!("no such tool \"{name}\""),
                }
            }
        };

        let deadline_at = tokio::time::Instant::now() + deadline;

        match spec.kind {
            ToolKind::Local => {
                let handler = match &spec.local {
                    Some(h) => h.clone(),
                    None => {
                        return InvokeOutcome::Err {
                            kind: "unknown",
                            detail: format!("tool \"{name}\" has no local handler"),
                        }
                    }
                };
                self.invoke_with_retry(|| handler.call(args.clone()), deadline_at)
                    .await
            }
            ToolKind::BuiltInProtocol | ToolKind::AgentTool | ToolKind::RemoteProtocol => {
                // No remote transport is wired into this build; surface as
                // TransportError so the dispatcher's retry path exercises
                // the same normalization a real remote call would hit.
                InvokeOutcome::Err {
                    kind: "transport_error",
                    detail: format!("tool \"{name}\" has no remote transport configured"),
                }
            }
        }
    }

    /// Retry on `TransportError` with exponential backoff (100ms * 2^n,
    /// jittered +/-20%); `InvalidArgs`/`Upstream` are application-level and
    /// never retried.
    async fn invoke_with_retry<F, Fut>(&self, mut call: F, deadline_at: tokio::time::Instant) -> InvokeOutcome
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let mut attempt = 0u32;
        loop {
            if tokio::time::Instant::now() >= deadline_at {
                return InvokeOutcome::Err {
                    kind: "timeout",
                    detail: "deadline exceeded before tool call completed".into(),
                };
            }

            match call().await {
                Ok(v) => return InvokeOutcome::Ok(normalize_result(v)),
                Err(e) => {
                    let kind = e.kind();
                    let retryable = matches!(e, Error::TransportError(_));
                    if !retryable || attempt >= MAX_RETRIES {
                        return InvokeOutcome::Err {
                            kind,
                            detail: e.to_string(),
                        };
                    }
                    let backoff_ms = BASE_BACKOFF_MS * (1u64 << attempt);
                    let jitter = jittered(backoff_ms);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Apply +/-20% jitter to a backoff duration using the call count as a
/// cheap deterministic seed (no external RNG dependency in this layer).
fn jittered(base_ms: u64) -> u64 {
    let variance = (base_ms as f64 * 0.2) as i64;
    let seed = (base_ms as i64) % (variance.max(1) * 2 + 1);
    let offset = seed - variance;
    (base_ms as i64 + offset).max(0) as u64
}

/// Wrap bare strings as `{"text": ...}` only when the caller expects
/// structured output and got a raw string back. Bare strings here are
/// already how local tools serialize (see exec/process/file_ops), so this
/// is a passthrough — preserved as the seam a remote transport's responses
/// would funnel through.
fn normalize_result(v: Value) -> Value {
    match v {
        Value::String(s) => serde_json::json!({ "text": s }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl LocalTool for EchoTool {
        async fn call(&self, args: Value) -> Result<Value> {
            Ok(args)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl LocalTool for FailingTool {
        async fn call(&self, _args: Value) -> Result<Value> {
            Err(Error::TransportError("connection reset".into()))
        }
    }

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test tool".into(),
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn register_rejects_lower_priority() {
        let mut reg = ToolRegistry::new();
        reg.register("echo", ToolSpec::local(def("echo"), 5, Arc::new(EchoTool)))
            .unwrap();
        let err = reg
            .register("echo", ToolSpec::local(def("echo"), 3, Arc::new(EchoTool)))
            .unwrap_err();
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn register_allows_strictly_higher_priority() {
        let mut reg = ToolRegistry::new();
        reg.register("echo", ToolSpec::local(def("echo"), 5, Arc::new(EchoTool)))
            .unwrap();
        reg.register("echo", ToolSpec::local(def("echo"), 6, Arc::new(EchoTool)))
            .unwrap();
        assert_eq!(reg.get("echo").unwrap().priority, 6);
    }

    #[tokio::test]
    async fn scoped_dispatcher_rejects_disallowed_name() {
        let mut reg = ToolRegistry::new();
        reg.register("echo", ToolSpec::local(def("echo"), 1, Arc::new(EchoTool)))
            .unwrap();
        let reg = Arc::new(reg);
        let dispatcher = reg.view(ToolPolicy { allow: vec!["other".into()], deny: vec![] });

        let outcome = dispatcher
            .invoke("echo", serde_json::json!({}), Duration::from_secs(1))
            .await;
        match outcome {
            InvokeOutcome::Err { kind, .. } => assert_eq!(kind, "not_permitted"),
            InvokeOutcome::Ok(_) => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn scoped_dispatcher_invokes_allowed_local_tool() {
        let mut reg = ToolRegistry::new();
        reg.register("echo", ToolSpec::local(def("echo"), 1, Arc::new(EchoTool)))
            .unwrap();
        let reg = Arc::new(reg);
        let dispatcher = reg.view(ToolPolicy::default());

        let outcome = dispatcher
            .invoke("echo", serde_json::json!({"hello": "world"}), Duration::from_secs(1))
            .await;
        match outcome {
            InvokeOutcome::Ok(v) => assert_eq!(v["hello"], "world"),
            InvokeOutcome::Err { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn scoped_dispatcher_returns_unknown_for_missing_tool() {
        let reg = Arc::new(ToolRegistry::new());
        let dispatcher = reg.view(ToolPolicy::default());
        let outcome = dispatcher
            .invoke("missing", serde_json::json!({}), Duration::from_secs(1))
            .await;
        match outcome {
            InvokeOutcome::Err { kind, .. } => assert_eq!(kind, "unknown"),
            InvokeOutcome::Ok(_) => panic!("expected unknown"),
        }
    }

    #[tokio::test]
    async fn transport_error_retried_then_surfaced() {
        let mut reg = ToolRegistry::new();
        reg.register("flaky", ToolSpec::local(def("flaky"), 1, Arc::new(FailingTool)))
            .unwrap();
        let reg = Arc::new(reg);
        let dispatcher = reg.view(ToolPolicy::default());

        let outcome = dispatcher
            .invoke("flaky", serde_json::json!({}), Duration::from_secs(5))
            .await;
        match outcome {
            InvokeOutcome::Err { kind, .. } => assert_eq!(kind, "transport_error"),
            InvokeOutcome::Ok(_) => panic!("expected eventual failure"),
        }
    }

    #[tokio::test]
    async fn invalid_args_never_retried() {
        struct BadArgsTool;
        #[async_trait]
        impl LocalTool for BadArgsTool {
            async fn call(&self, _args: Value) -> Result<Value> {
                Err(Error::InvalidArgs("missing field 'path'".into()))
            }
        }
        let mut reg = ToolRegistry::new();
        reg.register("bad", ToolSpec::local(def("bad"), 1, Arc::new(BadArgsTool)))
            .unwrap();
        let reg = Arc::new(reg);
        let dispatcher = reg.view(ToolPolicy::default());

        let outcome = dispatcher
            .invoke("bad", serde_json::json!({}), Duration::from_secs(5))
            .await;
        match outcome {
            InvokeOutcome::Err { kind, .. } => assert_eq!(kind, "invalid_args"),
            InvokeOutcome::Ok(_) => panic!("expected invalid_args"),
        }
    }
}
