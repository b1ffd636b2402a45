//! Async post-session memory extraction.
//!
//! Runs out-of-band after a session's `stream_end`: reads the last `K`
//! turns, asks the LLM to surface candidate memories, deduplicates them
//! (string-normalized equality; within a batch the later candidate wins a
//! collision), asks the LLM a second time whether a survivor contradicts
//! anything already on record, and hands the result to a [`MemorySink`] —
//! the user-memory store itself is an external collaborator, reached only
//! through this trait.

use std::collections::HashMap;
use std::sync::Arc;

use ao_domain::error::Result;
use ao_domain::tool::Message;
use ao_providers::{ChatRequest, LlmProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many trailing turns feed the extraction prompt.
pub const DEFAULT_LOOKBACK_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Preference,
    Persona,
    Requirement,
    Fact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub kind: MemoryKind,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    memories: Vec<MemoryCandidate>,
}

/// Port to the external user-memory store. `contradicts` asks whether an
/// existing memory of the same kind is invalidated by a new candidate;
/// `upsert` replaces it (or inserts fresh) once dedup/contradiction
/// resolution settles on a final candidate.
#[async_trait]
pub trait MemorySink: Send + Sync {
    async fn existing(&self, session_id: Uuid, kind: MemoryKind) -> Result<Vec<String>>;
    async fn upsert(&self, session_id: Uuid, candidate: &MemoryCandidate) -> Result<()>;
    async fn delete(&self, session_id: Uuid, stale_text: &str) -> Result<()>;
}

/// A sink with nowhere to send facts; used when no memory store is
/// configured for a deployment.
pub struct NullMemorySink;

#[async_trait]
impl MemorySink for NullMemorySink {
    async fn existing(&self, _session_id: Uuid, _kind: MemoryKind) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn upsert(&self, _session_id: Uuid, _candidate: &MemoryCandidate) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _session_id: Uuid, _stale_text: &str) -> Result<()> {
        Ok(())
    }
}

pub struct MemoryExtractor {
    provider: Arc<dyn LlmProvider>,
    sink: Arc<dyn MemorySink>,
    lookback_turns: usize,
}

pub struct ExtractionReport {
    pub facts_extracted: usize,
    pub facts_deduped: usize,
    pub facts_contradicted: usize,
}

impl MemoryExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, sink: Arc<dyn MemorySink>) -> Self {
        Self {
            provider,
            sink,
            lookback_turns: DEFAULT_LOOKBACK_TURNS,
        }
    }

    /// Run extraction over a session's final transcript. `memory_handle`
    /// scopes which store/namespace candidates are written under; when
    /// `None` extraction is skipped entirely (no memory configured for
    /// this session).
    pub async fn run(
        &self,
        session_id: Uuid,
        memory_handle: Option<&str>,
        transcript: &[Message],
    ) -> Result<ExtractionReport> {
        if memory_handle.is_none() {
            return Ok(ExtractionReport {
                facts_extracted: 0,
                facts_deduped: 0,
                facts_contradicted: 0,
            });
        }

        let tail: Vec<&Message> = transcript.iter().rev().take(self.lookback_turns).rev().collect();
        if tail.is_empty() {
            return Ok(ExtractionReport {
                facts_extracted: 0,
                facts_deduped: 0,
                facts_contradicted: 0,
            });
        }

        let prompt = build_extraction_prompt(&tail);
        let req = ChatRequest {
            messages: vec![Message::user(session_id, prompt)],
            json_mode: true,
            ..Default::default()
        };
        let response = self.provider.chat(&req).await?;
        let parsed: ExtractionResponse = serde_json::from_str(&response.content).unwrap_or(ExtractionResponse {
            memories: Vec::new(),
        });

        let extracted = parsed.memories.len();
        let deduped_candidates = dedup_within_batch(parsed.memories);
        let deduped = extracted - deduped_candidates.len();

        let mut contradicted = 0;
        for candidate in &deduped_candidates {
            let existing = self.sink.existing(session_id, candidate.kind).await?;
            for stale in existing {
                if normalize(&stale) != normalize(&candidate.text)
                    && self.contradicts(session_id, &stale, &candidate.text).await?
                {
                    self.sink.delete(session_id, &stale).await?;
                    contradicted += 1;
                }
            }
            self.sink.upsert(session_id, candidate).await?;
        }

        let report = ExtractionReport {
            facts_extracted: extracted,
            facts_deduped: deduped,
            facts_contradicted: contradicted,
        };

        ao_domain::trace::TraceEvent::MemoryExtracted {
            session_id: session_id.to_string(),
            facts_extracted: report.facts_extracted,
            facts_deduped: report.facts_deduped,
            facts_contradicted: report.facts_contradicted,
        }
        .emit();

        Ok(report)
    }

    /// Short LLM-judged contradiction check between a stored memory and a
    /// fresh candidate covering the same subject. Falls back to `false`
    /// (keep both, let the store accumulate) if the model's answer isn't
    /// parseable — a missed contradiction is cheaper to live with than a
    /// wrongly deleted memory.
    async fn contradicts(&self, session_id: Uuid, stale: &str, fresh: &str) -> Result<bool> {
        let prompt = format!(
            "Existing memory: \"{stale}\"\nNew candidate memory: \"{fresh}\"\n\
             Does the new candidate contradict (not just add detail to) the existing one? \
             Respond as JSON: {{\"contradicts\": true|false}}.",
        );
        let req = ChatRequest {
            messages: vec![Message::user(session_id, prompt)],
            json_mode: true,
            ..Default::default()
        };
        let response = self.provider.chat(&req).await?;
        let parsed: ContradictionVerdict = serde_json::from_str(&response.content).unwrap_or(ContradictionVerdict {
            contradicts: false,
        });
        Ok(parsed.contradicts)
    }
}

#[derive(Debug, Deserialize)]
struct ContradictionVerdict {
    #[serde(default)]
    contradicts: bool,
}

fn build_extraction_prompt(tail: &[&Message]) -> String {
    let mut body = String::from(
        "Extract durable user memories from the conversation below. \
         Respond as JSON: {\"memories\": [{\"kind\": \"preference|persona|requirement|fact\", \"text\": \"...\"}]}.\n\n",
    );
    for msg in tail {
        body.push_str(&format!("{:?}: {}\n", msg.role, msg.content.extract_all_text()));
    }
    body
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Exact string-normalized dedup; when two candidates collide the
/// later-in-batch one wins (it overwrites the earlier slot).
fn dedup_within_batch(candidates: Vec<MemoryCandidate>) -> Vec<MemoryCandidate> {
    let mut by_key: HashMap<(MemoryKind, String), MemoryCandidate> = HashMap::new();
    let mut order: Vec<(MemoryKind, String)> = Vec::new();
    for candidate in candidates {
        let key = (candidate.kind, normalize(&candidate.text));
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.insert(key, candidate);
    }
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_later_candidate_on_collision() {
        let candidates = vec![
            MemoryCandidate {
                kind: MemoryKind::Preference,
                text: "likes dark mode".into(),
            },
            MemoryCandidate {
                kind: MemoryKind::Preference,
                text: "Likes Dark Mode".into(),
            },
            MemoryCandidate {
                kind: MemoryKind::Preference,
                text: "prefers dark mode everywhere".into(),
            },
        ];
        let deduped = dedup_within_batch(candidates);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, "Likes Dark Mode");
    }

    #[tokio::test]
    async fn contradicts_uses_the_provider_verdict() {
        let provider = ao_providers::MockProvider::new("mock");
        provider.push_response(ao_providers::ChatResponse {
            content: "{\"contradicts\": true}".into(),
            tool_calls: Vec::new(),
            usage: None,
            model: "mock".into(),
            finish_reason: Some("stop".into()),
        });
        let extractor = MemoryExtractor::new(Arc::new(provider), Arc::new(NullMemorySink));
        let session_id = Uuid::new_v4();
        assert!(extractor.contradicts(session_id, "prefers python", "prefers rust").await.unwrap());
    }

    #[tokio::test]
    async fn contradicts_defaults_to_false_on_unparseable_verdict() {
        let provider = ao_providers::MockProvider::new("mock");
        provider.push_response(ao_providers::ChatResponse {
            content: "not json".into(),
            tool_calls: Vec::new(),
            usage: None,
            model: "mock".into(),
            finish_reason: Some("stop".into()),
        });
        let extractor = MemoryExtractor::new(Arc::new(provider), Arc::new(NullMemorySink));
        let session_id = Uuid::new_v4();
        assert!(!extractor.contradicts(session_id, "likes tea", "dislikes coffee").await.unwrap());
    }

    #[tokio::test]
    async fn run_skips_extraction_with_no_memory_handle() {
        let extractor = MemoryExtractor::new(
            Arc::new(ao_providers::MockProvider::new("mock")),
            Arc::new(NullMemorySink),
        );
        let report = extractor
            .run(Uuid::new_v4(), None, &[Message::user(Uuid::new_v4(), "hi")])
            .await
            .unwrap();
        assert_eq!(report.facts_extracted, 0);
    }
}
