//! The wire-facing event envelope.

use ao_domain::stream::Usage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One frame on a session's event stream. `seq` is monotonic per session
/// and lets a consumer detect gaps or reorderings introduced by the
/// transport below `ao-events` (out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: Uuid,
    pub message_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEndReason {
    Completed,
    Interrupted,
    Failed,
}

/// Payload carried by the frame type `chunk_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStart {
    pub message_id: Uuid,
    pub original_type: String,
    pub total_chunks: usize,
    pub total_bytes: usize,
}

/// Payload carried by the frame type `json_chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonChunk {
    pub message_id: Uuid,
    pub chunk_index: usize,
    pub chunk_data: String,
}

/// Payload carried by the frame type `chunk_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEnd {
    pub message_id: Uuid,
}

/// Payload carried by the terminal frame type `stream_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEndPayload {
    pub reason: StreamEndReason,
    pub token_usage: Usage,
}

/// A content frame: token deltas, tool-call lifecycle notices, and tool
/// results all publish under this type. `payload.kind` discriminates which
/// (`"token"`, `"tool_call_started"`, `"tool_call_finished"`, `"tool_result"`).
pub const TYPE_MESSAGE: &str = "message";
/// A phase or tool failure surfaced mid-stream, ahead of the terminal
/// `stream_end{failed}` frame. `payload` carries `{kind, message}` shaped
/// like `Error::kind()`/`Display`.
pub const TYPE_ERROR: &str = "error";
pub const TYPE_CHUNK_START: &str = "chunk_start";
pub const TYPE_JSON_CHUNK: &str = "json_chunk";
pub const TYPE_CHUNK_END: &str = "chunk_end";
pub const TYPE_STREAM_END: &str = "stream_end";
