//! In-memory, append-only message log for one session.
//!
//! Messages are never deleted — `coalesce` extends a prior message's
//! content in place (streaming deltas), `replace` swaps it wholesale
//! (tool-result phases), and `history_for` derives a bounded view for the
//! next LLM call without mutating the underlying log.

use ao_domain::tool::{Message, MessageContent, MessageType, Role};
use uuid::Uuid;

use crate::search::bm25_rank;

/// Number of older user turns the BM25 relevance filter is allowed to
/// keep, beyond the always-kept most-recent turn.
const RELEVANT_TURN_LIMIT: usize = 20;

pub struct MessageManager {
    messages: Vec<Message>,
}

impl MessageManager {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a message to the end of the log, preserving order.
    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Append `delta` to the content (and show_content, if present) of the
    /// message with `message_id`. No-op if the id isn't found.
    pub fn coalesce(&mut self, message_id: Uuid, delta: &str) {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.message_id == message_id) {
            append_text(&mut msg.content, delta);
            if let Some(ref mut show) = msg.show_content {
                append_text(show, delta);
            }
        }
    }

    /// Replace the message with `message_id` wholesale. Appends if no
    /// existing message carries that id.
    pub fn replace(&mut self, message_id: Uuid, msg: Message) {
        match self.messages.iter_mut().find(|m| m.message_id == message_id) {
            Some(slot) => *slot = msg,
            None => self.messages.push(msg),
        }
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Derive a bounded view of the history suitable for the next LLM
    /// call: drop non-essential intermediate-phase messages, keep the
    /// most relevant older turns (BM25 against the latest user message),
    /// then hard-truncate the oldest remainder to fit `budget_tokens`.
    /// Always keeps the most recent user message and the last assistant
    /// turn (the system prefix is prepended separately by the caller).
    pub fn history_for(&self, _phase: &str, budget_tokens: u32) -> Vec<Message> {
        if self.messages.is_empty() {
            return Vec::new();
        }

        // Step 1: drop non-essential intermediate messages (internal
        // reasoning from earlier phases that later phases don't need).
        let essential: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.message_type != MessageType::Thought)
            .collect();

        let last_user_idx = essential.iter().rposition(|m| m.role == Role::User);
        let last_assistant_idx = essential.iter().rposition(|m| m.role == Role::Assistant);

        // Step 2: BM25-relevance filter over older turns (everything
        // before the last user message), scored against its text.
        let kept_indices: std::collections::BTreeSet<usize> = match last_user_idx {
            Some(last_idx) => {
                let query = essential[last_idx].content.extract_all_text();
                let candidates: Vec<(usize, String)> = essential[..last_idx]
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.role == Role::User)
                    .map(|(i, m)| (i, m.content.extract_all_text()))
                    .collect();

                let ranked = bm25_rank(&query, &candidates);
                let mut keep: std::collections::BTreeSet<usize> = ranked
                    .into_iter()
                    .take(RELEVANT_TURN_LIMIT)
                    .map(|(i, _)| i)
                    .collect();

                // A kept user turn pulls in every message up to (but not
                // including) the next kept/essential user turn, so tool
                // calls and their results stay attached to the turn that
                // produced them.
                let mut expanded = std::collections::BTreeSet::new();
                let user_positions: Vec<usize> = essential
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.role == Role::User)
                    .map(|(i, _)| i)
                    .collect();
                for &u in &keep {
                    let start = u;
                    let end = user_positions
                        .iter()
                        .find(|&&p| p > u)
                        .copied()
                        .unwrap_or(essential.len());
                    for i in start..end {
                        expanded.insert(i);
                    }
                }
                keep = expanded;

                // Always keep everything from the last user message onward.
                for i in last_idx..essential.len() {
                    keep.insert(i);
                }
                keep
            }
            None => (0..essential.len()).collect(),
        };

        let mut filtered: Vec<&Message> = kept_indices.into_iter().map(|i| essential[i]).collect();

        // Step 3: hard-truncate oldest to fit budget, but never drop the
        // last user message or the last assistant turn.
        let mut total: u64 = filtered.iter().map(|m| estimate_tokens(m)).sum();
        let mut start = 0;
        while total > budget_tokens as u64 && start < filtered.len() {
            let candidate = filtered[start];
            let is_last_user = last_user_idx.map(|i| essential[i].message_id) == Some(candidate.message_id);
            let is_last_assistant =
                last_assistant_idx.map(|i| essential[i].message_id) == Some(candidate.message_id);
            if is_last_user || is_last_assistant {
                break;
            }
            total -= estimate_tokens(candidate);
            start += 1;
        }
        filtered.drain(..start);

        filtered.into_iter().cloned().collect()
    }
}

impl Default for MessageManager {
    fn default() -> Self {
        Self::new()
    }
}

fn append_text(content: &mut MessageContent, delta: &str) {
    match content {
        MessageContent::Text(t) => t.push_str(delta),
        MessageContent::Parts(_) => {
            // Structured content doesn't support incremental text append;
            // the phase should use `replace` instead.
        }
    }
}

/// Rough token estimate (chars / 4), good enough for budget truncation
/// without a real tokenizer dependency.
fn estimate_tokens(msg: &Message) -> u64 {
    let text_len = msg.content.extract_all_text().len() as u64;
    (text_len / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn append_preserves_order() {
        let session = sid();
        let mut mgr = MessageManager::new();
        mgr.append(Message::user(session, "first"));
        mgr.append(Message::assistant(session, "second"));
        assert_eq!(mgr.all().len(), 2);
        assert_eq!(mgr.all()[0].content.extract_all_text(), "first");
        assert_eq!(mgr.all()[1].content.extract_all_text(), "second");
    }

    #[test]
    fn coalesce_appends_delta() {
        let session = sid();
        let mut mgr = MessageManager::new();
        let msg = Message::assistant(session, "Hel");
        let id = msg.message_id;
        mgr.append(msg);
        mgr.coalesce(id, "lo");
        assert_eq!(mgr.all()[0].content.extract_all_text(), "Hello");
    }

    #[test]
    fn coalesce_unknown_id_is_noop() {
        let mut mgr = MessageManager::new();
        mgr.coalesce(Uuid::new_v4(), "ignored");
        assert!(mgr.all().is_empty());
    }

    #[test]
    fn replace_swaps_existing_message() {
        let session = sid();
        let mut mgr = MessageManager::new();
        let msg = Message::tool_result(session, "call1", "pending");
        let id = msg.message_id;
        mgr.append(msg);

        let mut replacement = Message::tool_result(session, "call1", "done");
        replacement.message_id = id;
        mgr.replace(id, replacement);

        assert_eq!(mgr.all().len(), 1);
        let content = match &mgr.all()[0].content {
            ao_domain::tool::MessageContent::Parts(parts) => match &parts[0] {
                ao_domain::tool::ContentPart::ToolResult { content, .. } => content.clone(),
                _ => panic!("expected tool result part"),
            },
            _ => panic!("expected parts content"),
        };
        assert_eq!(content, "done");
    }

    #[test]
    fn replace_appends_when_id_missing() {
        let session = sid();
        let mut mgr = MessageManager::new();
        mgr.replace(Uuid::new_v4(), Message::user(session, "new"));
        assert_eq!(mgr.all().len(), 1);
    }

    #[test]
    fn history_for_keeps_most_recent_user_and_assistant() {
        let session = sid();
        let mut mgr = MessageManager::new();
        mgr.append(Message::user(session, "hello"));
        mgr.append(Message::assistant(session, "hi there"));
        mgr.append(Message::user(session, "what's the weather"));

        let history = mgr.history_for("router", 10_000);
        assert!(history.iter().any(|m| m.content.extract_all_text() == "what's the weather"));
    }

    #[test]
    fn history_for_drops_thought_messages() {
        let session = sid();
        let mut mgr = MessageManager::new();
        let mut thought = Message::assistant(session, "internal reasoning");
        thought.message_type = MessageType::Thought;
        mgr.append(thought);
        mgr.append(Message::user(session, "hello"));

        let history = mgr.history_for("router", 10_000);
        assert!(!history.iter().any(|m| m.message_type == MessageType::Thought));
    }

    #[test]
    fn history_for_empty_log_returns_empty() {
        let mgr = MessageManager::new();
        assert!(mgr.history_for("router", 1_000).is_empty());
    }

    #[test]
    fn history_for_truncates_oldest_to_fit_budget() {
        let session = sid();
        let mut mgr = MessageManager::new();
        for i in 0..50 {
            mgr.append(Message::user(session, format!("turn number {i} with some padding text")));
            mgr.append(Message::assistant(session, "ok"));
        }
        let history = mgr.history_for("router", 50);
        assert!(history.len() < 100);
        // The very last user turn must still be present.
        assert!(history
            .iter()
            .any(|m| m.content.extract_all_text().contains("turn number 49")));
    }
}
