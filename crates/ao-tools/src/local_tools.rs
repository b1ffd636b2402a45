//! Adapts the exec/process/file_ops primitives to the [`LocalTool`] seam so
//! they can be registered into a [`ToolRegistry`] alongside remote tools.

use crate::exec::{self, ExecRequest};
use crate::file_ops;
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};
use crate::registry::{LocalTool, ToolRegistry, ToolSpec};
use ao_domain::error::{Error, Result};
use ao_domain::tool::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const BUILTIN_PRIORITY: u32 = 0;

struct ExecTool {
    manager: Arc<ProcessManager>,
}

#[async_trait]
impl LocalTool for ExecTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let req: ExecRequest = serde_json::from_value(args)
            .map_err(|e| Error::InvalidArgs(format!("invalid exec arguments: {e}")))?;
        let resp = exec::exec(&self.manager, req).await;
        serde_json::to_value(resp).map_err(Error::from)
    }
}

struct ProcessTool {
    manager: Arc<ProcessManager>,
}

#[async_trait]
impl LocalTool for ProcessTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let req: ProcessRequest = serde_json::from_value(args)
            .map_err(|e| Error::InvalidArgs(format!("invalid process arguments: {e}")))?;
        let resp = process::handle_process(&self.manager, req).await;
        serde_json::to_value(resp).map_err(Error::from)
    }
}

/// Shared handler for the six file_ops actions; each is registered as its
/// own named tool since their argument shapes don't unify cleanly.
struct FileOpTool {
    workspace_root: PathBuf,
    op: FileOp,
}

#[derive(Clone, Copy)]
enum FileOp {
    Read,
    Write,
    Append,
    Move,
    Delete,
    List,
}

#[async_trait]
impl LocalTool for FileOpTool {
    async fn call(&self, args: Value) -> Result<Value> {
        let root = &self.workspace_root;
        let result = match self.op {
            FileOp::Read => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_read arguments: {e}")))?;
                file_ops::file_read(root, req).await
            }
            FileOp::Write => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_write arguments: {e}")))?;
                file_ops::file_write(root, req).await
            }
            FileOp::Append => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_append arguments: {e}")))?;
                file_ops::file_append(root, req).await
            }
            FileOp::Move => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_move arguments: {e}")))?;
                file_ops::file_move(root, req).await
            }
            FileOp::Delete => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_delete arguments: {e}")))?;
                file_ops::file_delete(root, req).await
            }
            FileOp::List => {
                let req = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArgs(format!("invalid file_list arguments: {e}")))?;
                file_ops::file_list(root, req).await
            }
        };
        // file_ops reports its own failures (bad path, missing file, ...) as
        // plain strings; these are application-level, not transport errors,
        // so they surface as InvalidArgs rather than being retried.
        result.map_err(Error::InvalidArgs)
    }
}

fn def(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters,
    }
}

/// Register the built-in exec/process/file_ops tools into `registry`.
///
/// Call this once at startup after constructing the [`ProcessManager`] and
/// resolving the session workspace root.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    manager: Arc<ProcessManager>,
    workspace_root: PathBuf,
) -> Result<()> {
    registry.register(
        "exec",
        ToolSpec::local(
            def(
                "exec",
                "Run a shell command, foreground or backgrounded after a yield window.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "background": {"type": "boolean"},
                        "yield_ms": {"type": "integer"},
                        "timeout_sec": {"type": "integer"},
                        "workdir": {"type": "string"},
                        "env": {"type": "object"}
                    },
                    "required": ["command"]
                }),
            ),
            BUILTIN_PRIORITY,
            Arc::new(ExecTool {
                manager: manager.clone(),
            }),
        ),
    )?;

    registry.register(
        "process",
        ToolSpec::local(
            def(
                "process",
                "Manage background process sessions (list/poll/log/write/kill/clear/remove).",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"]},
                        "session_id": {"type": "string"},
                        "offset": {"type": "integer"},
                        "limit": {"type": "integer"},
                        "tail_lines": {"type": "integer"},
                        "data": {"type": "string"},
                        "eof": {"type": "boolean"}
                    },
                    "required": ["action"]
                }),
            ),
            BUILTIN_PRIORITY,
            Arc::new(ProcessTool { manager }),
        ),
    )?;

    let file_ops_specs: &[(&str, &str, FileOp, Value)] = &[
        (
            "file_read",
            "Read a file's contents, optionally by line range.",
            FileOp::Read,
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "offset": {"type": "integer"}, "limit": {"type": "integer"}}, "required": ["path"]}),
        ),
        (
            "file_write",
            "Write (create or overwrite) a file's contents.",
            FileOp::Write,
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
        ),
        (
            "file_append",
            "Append content to an existing file, creating it if absent.",
            FileOp::Append,
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
        ),
        (
            "file_move",
            "Move or rename a file or directory within the workspace.",
            FileOp::Move,
            serde_json::json!({"type": "object", "properties": {"source": {"type": "string"}, "destination": {"type": "string"}}, "required": ["source", "destination"]}),
        ),
        (
            "file_delete",
            "Delete a file or empty directory.",
            FileOp::Delete,
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        ),
        (
            "file_list",
            "List entries in a workspace directory.",
            FileOp::List,
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        ),
    ];

    for (name, description, op, params) in file_ops_specs {
        registry.register(
            *name,
            ToolSpec::local(
                def(name, description, params.clone()),
                BUILTIN_PRIORITY,
                Arc::new(FileOpTool {
                    workspace_root: workspace_root.clone(),
                    op: *op,
                }),
            ),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InvokeOutcome;
    use ao_domain::config::{ExecConfig, ToolPolicy};
    use std::time::Duration;

    #[tokio::test]
    async fn exec_tool_runs_foreground_command() {
        let ws = tempfile::tempdir().unwrap();
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, manager, ws.path().to_path_buf()).unwrap();
        let dispatcher = Arc::new(registry).view(ToolPolicy::default());

        let outcome = dispatcher
            .invoke(
                "exec",
                serde_json::json!({"command": "echo hi", "yield_ms": 2000}),
                Duration::from_secs(5),
            )
            .await;
        match outcome {
            InvokeOutcome::Ok(v) => assert!(v["output"].as_str().unwrap_or_default().contains("hi")),
            InvokeOutcome::Err { kind, detail } => panic!("unexpected error {kind}: {detail}"),
        }
    }

    #[tokio::test]
    async fn file_write_then_read_round_trips() {
        let ws = tempfile::tempdir().unwrap();
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, manager, ws.path().to_path_buf()).unwrap();
        let dispatcher = Arc::new(registry).view(ToolPolicy::default());

        let write_outcome = dispatcher
            .invoke(
                "file_write",
                serde_json::json!({"path": "notes.txt", "content": "hello"}),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(write_outcome, InvokeOutcome::Ok(_)));

        let read_outcome = dispatcher
            .invoke(
                "file_read",
                serde_json::json!({"path": "notes.txt"}),
                Duration::from_secs(5),
            )
            .await;
        match read_outcome {
            InvokeOutcome::Ok(v) => assert_eq!(v["content"], "hello"),
            InvokeOutcome::Err { kind, detail } => panic!("unexpected error {kind}: {detail}"),
        }
    }

    #[tokio::test]
    async fn file_read_missing_file_is_invalid_args_not_retried() {
        let ws = tempfile::tempdir().unwrap();
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, manager, ws.path().to_path_buf()).unwrap();
        let dispatcher = Arc::new(registry).view(ToolPolicy::default());

        let outcome = dispatcher
            .invoke(
                "file_read",
                serde_json::json!({"path": "missing.txt"}),
                Duration::from_secs(5),
            )
            .await;
        match outcome {
            InvokeOutcome::Err { kind, .. } => assert_eq!(kind, "invalid_args"),
            InvokeOutcome::Ok(_) => panic!("expected failure"),
        }
    }
}
