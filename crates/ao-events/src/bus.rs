//! Bounded, backpressured event channel with chunked framing for large
//! payloads and dedup-safe reassembly on the consumer side.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ao_domain::stream::Usage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{
    ChunkEnd, ChunkStart, Event, JsonChunk, StreamEndPayload, StreamEndReason, TYPE_CHUNK_END,
    TYPE_CHUNK_START, TYPE_JSON_CHUNK, TYPE_STREAM_END,
};

/// Default bounded channel capacity; a slow consumer makes `publish`
/// block (cooperative backpressure) once this many frames are queued.
pub const DEFAULT_CAPACITY: usize = 256;

/// Payloads whose serialized form exceeds this many bytes are split
/// across `chunk_start` / `json_chunk` / `chunk_end` frames.
const CHUNK_THRESHOLD_BYTES: usize = 32 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event receiver dropped")]
    Closed,
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Producer handle for a session's event stream.
#[derive(Clone)]
pub struct EventBus {
    session_id: Uuid,
    tx: mpsc::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus/receiver pair for `session_id` with the default
    /// bounded capacity.
    pub fn new(session_id: Uuid) -> (Self, EventReceiver) {
        Self::with_capacity(session_id, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(session_id: Uuid, capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                session_id,
                tx,
                seq: Arc::new(AtomicU64::new(0)),
            },
            EventReceiver {
                rx,
                reassembly: HashMap::new(),
            },
        )
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_raw(&self, message_id: Uuid, event_type: impl Into<String>, payload: serde_json::Value) -> Result<(), PublishError> {
        let event = Event {
            session_id: self.session_id,
            message_id,
            event_type: event_type.into(),
            payload,
            seq: self.next_seq(),
        };
        self.tx.send(event).await.map_err(|_| PublishError::Closed)
    }

    /// Publish one logical event under `message_id`. If the serialized
    /// payload exceeds the chunking threshold it is transparently split
    /// into `chunk_start` / `json_chunk`* / `chunk_end` frames; otherwise
    /// it's sent as a single frame of `event_type`.
    pub async fn publish(
        &self,
        message_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        let event_type = event_type.into();
        let serialized = serde_json::to_string(&payload)?;
        if serialized.len() <= CHUNK_THRESHOLD_BYTES {
            return self.send_raw(message_id, event_type, payload).await;
        }

        let chunks = split_char_boundary(&serialized, CHUNK_THRESHOLD_BYTES);
        let total_chunks = chunks.len();
        let total_bytes = serialized.len();

        self.send_raw(
            message_id,
            TYPE_CHUNK_START,
            serde_json::to_value(ChunkStart {
                message_id,
                original_type: event_type,
                total_chunks,
                total_bytes,
            })?,
        )
        .await?;

        for (chunk_index, chunk_data) in chunks.into_iter().enumerate() {
            self.send_raw(
                message_id,
                TYPE_JSON_CHUNK,
                serde_json::to_value(JsonChunk {
                    message_id,
                    chunk_index,
                    chunk_data,
                })?,
            )
            .await?;
        }

        self.send_raw(message_id, TYPE_CHUNK_END, serde_json::to_value(ChunkEnd { message_id })?)
            .await
    }

    /// Publish the terminating frame. No further events should be
    /// published on this bus afterward.
    pub async fn stream_end(&self, reason: StreamEndReason, token_usage: Usage) -> Result<(), PublishError> {
        self.send_raw(
            Uuid::new_v4(),
            TYPE_STREAM_END,
            serde_json::to_value(StreamEndPayload { reason, token_usage })?,
        )
        .await
    }
}

/// Split `s` into chunks of at most `max_bytes`, never splitting a char.
fn split_char_boundary(s: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + max_bytes).min(s.len());
        while end < s.len() && !s.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(s[start..end].to_string());
        start = end;
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

struct Reassembly {
    original_type: String,
    total_chunks: usize,
    seq: u64,
    chunks: BTreeMap<usize, String>,
}

/// Consumer handle. Transparently reassembles chunked frames back into a
/// single logical [`Event`] before handing it to the caller.
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
    reassembly: HashMap<Uuid, Reassembly>,
}

impl EventReceiver {
    /// Receive the next logical event, reassembling chunked frames as
    /// needed. Returns `None` once the bus is dropped and all buffered
    /// frames are drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let event = self.rx.recv().await?;
            match event.event_type.as_str() {
                crate::event::TYPE_CHUNK_START => {
                    if let Ok(start) = serde_json::from_value::<ChunkStart>(event.payload.clone()) {
                        self.reassembly.insert(
                            start.message_id,
                            Reassembly {
                                original_type: start.original_type,
                                total_chunks: start.total_chunks,
                                seq: event.seq,
                                chunks: BTreeMap::new(),
                            },
                        );
                    }
                }
                crate::event::TYPE_JSON_CHUNK => {
                    if let Ok(chunk) = serde_json::from_value::<JsonChunk>(event.payload.clone()) {
                        if let Some(entry) = self.reassembly.get_mut(&chunk.message_id) {
                            // Dedup by chunk_index: a retransmitted chunk
                            // with the same index is ignored.
                            entry.chunks.entry(chunk.chunk_index).or_insert(chunk.chunk_data);
                        }
                    }
                }
                crate::event::TYPE_CHUNK_END => {
                    if let Ok(end) = serde_json::from_value::<ChunkEnd>(event.payload.clone()) {
                        if let Some(entry) = self.reassembly.remove(&end.message_id) {
                            if entry.chunks.len() != entry.total_chunks {
                                tracing::warn!(
                                    message_id = %end.message_id,
                                    expected = entry.total_chunks,
                                    got = entry.chunks.len(),
                                    "chunked event reassembled with missing pieces"
                                );
                            }
                            let joined: String = entry.chunks.into_values().collect();
                            let payload = serde_json::from_str(&joined).unwrap_or(serde_json::Value::Null);
                            return Some(Event {
                                session_id: event.session_id,
                                message_id: end.message_id,
                                event_type: entry.original_type,
                                payload,
                                seq: entry.seq,
                            });
                        }
                    }
                }
                _ => return Some(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_payload_sent_as_single_frame() {
        let session_id = Uuid::new_v4();
        let (bus, mut rx) = EventBus::new(session_id);
        let message_id = Uuid::new_v4();
        bus.publish(message_id, "token", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "token");
        assert_eq!(event.payload["text"], "hi");
    }

    #[tokio::test]
    async fn large_payload_is_chunked_and_reassembled() {
        let session_id = Uuid::new_v4();
        let (bus, mut rx) = EventBus::new(session_id);
        let message_id = Uuid::new_v4();
        let big_text = "x".repeat(100_000);
        bus.publish(message_id, "tool_call_finished", serde_json::json!({"text": big_text}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "tool_call_finished");
        assert_eq!(event.payload["text"].as_str().unwrap().len(), 100_000);
    }

    #[tokio::test]
    async fn stream_end_is_final_frame() {
        let session_id = Uuid::new_v4();
        let (bus, mut rx) = EventBus::new(session_id);
        bus.stream_end(
            StreamEndReason::Completed,
            Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        )
        .await
        .unwrap();
        drop(bus);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "stream_end");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn backpressure_blocks_when_channel_full() {
        let session_id = Uuid::new_v4();
        let (bus, mut rx) = EventBus::with_capacity(session_id, 1);
        let message_id = Uuid::new_v4();
        bus.publish(message_id, "token", serde_json::json!({"text": "one"}))
            .await
            .unwrap();

        let bus2 = bus.clone();
        let publish_second = tokio::spawn(async move {
            bus2.publish(message_id, "token", serde_json::json!({"text": "two"})).await
        });

        // The consumer hasn't drained yet, so the second publish should
        // still be pending until we recv.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!publish_second.is_finished());

        rx.recv().await.unwrap();
        publish_second.await.unwrap().unwrap();
    }
}
