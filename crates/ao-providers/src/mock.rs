//! In-process mock provider.
//!
//! Used by crate tests and by callers that want a deterministic
//! [`LlmProvider`] without a network round trip. Not wired into
//! [`crate::registry::ProviderRegistry::from_config`] — construct it
//! directly and insert it where a real provider would go.

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use ao_domain::capability::LlmCapabilities;
use ao_domain::error::Result;
use ao_domain::stream::{BoxStream, StreamEvent};
use parking_lot::Mutex;

/// A scripted [`LlmProvider`] that returns queued responses in order.
///
/// Each call to `chat` pops the next queued [`ChatResponse`]; if the queue
/// is empty it returns an empty-content response with `finish_reason: "stop"`.
pub struct MockProvider {
    id: String,
    capabilities: LlmCapabilities,
    queued: Mutex<Vec<ChatResponse>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: LlmCapabilities {
                supports_tools: ao_domain::capability::ToolSupport::StrictJson,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(8_192),
            },
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response to be returned by the next `chat` call.
    pub fn push_response(&self, response: ChatResponse) {
        self.queued.lock().push(response);
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        let mut queued = self.queued.lock();
        if queued.is_empty() {
            return Ok(ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage: None,
                model: self.id.clone(),
                finish_reason: Some("stop".into()),
            });
        }
        Ok(queued.remove(0))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.chat(req).await?;
        let stream = async_stream::stream! {
            if !response.content.is_empty() {
                yield Ok(StreamEvent::Token { text: response.content });
            }
            yield Ok(StreamEvent::Done {
                usage: response.usage,
                finish_reason: response.finish_reason,
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let embeddings = req.input.iter().map(|s| vec![s.len() as f32]).collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
