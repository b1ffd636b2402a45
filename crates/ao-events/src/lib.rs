//! The session event stream: a bounded, backpressured channel of
//! `{session_id, message_id, type, payload, seq}` frames, with
//! transparent chunked framing for large payloads and a terminating
//! `stream_end` frame carrying the session's final token usage.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventReceiver, PublishError, DEFAULT_CAPACITY};
pub use event::{
    ChunkEnd, ChunkStart, Event, JsonChunk, StreamEndPayload, StreamEndReason, TYPE_CHUNK_END,
    TYPE_CHUNK_START, TYPE_ERROR, TYPE_JSON_CHUNK, TYPE_MESSAGE, TYPE_STREAM_END,
};
