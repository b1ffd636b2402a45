use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub status: ToolCallStatus,
}

/// Lifecycle state of a tool call within a `PhaseRunner` round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in a `SessionContext`'s history.
///
/// `content` is what gets sent to the LLM; `show_content`, when present,
/// is what a client-facing transcript should render instead (e.g. a
/// condensed one-liner for a large tool result). Ordering within a
/// session is by `(timestamp, message_id)` — `message_id` breaks ties
/// for messages produced in the same tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub content: MessageContent,
    /// Client-facing rendering, when it should differ from `content`.
    #[serde(default)]
    pub show_content: Option<MessageContent>,
    /// Ordered tool calls attached to an assistant message.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Discriminates a message's origin for history filtering and pruning,
/// independent of `role` (a `Tool` role message is always `type = tool_result`;
/// an `Assistant` role message may be `type = reply` or `type = thought`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Reply,
    Thought,
    ToolResult,
    SystemNote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    fn new(session_id: Uuid, role: Role, message_type: MessageType, content: MessageContent) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            session_id,
            role,
            message_type,
            content,
            show_content: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn system(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            Role::System,
            MessageType::SystemNote,
            MessageContent::Text(text.into()),
        )
    }
    pub fn user(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, MessageType::Reply, MessageContent::Text(text.into()))
    }
    pub fn assistant(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            Role::Assistant,
            MessageType::Reply,
            MessageContent::Text(text.into()),
        )
    }
    pub fn tool_result(session_id: Uuid, tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            session_id,
            Role::Tool,
            MessageType::ToolResult,
            MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        )
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (ToolUse, ToolResult, Image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }
}
