//! BM25 relevance ranking over a session's older user turns.
//!
//! Generalizes the match-count reverse index this crate used to keep for
//! cross-session transcript search into a proper Okapi BM25 scorer used by
//! [`crate::message::MessageManager::history_for`] to decide which older
//! turns are worth keeping inside a token budget.

/// Term frequency saturation parameter.
const K1: f64 = 1.2;
/// Length normalization parameter.
const B: f64 = 0.75;

/// Rank `candidates` (index, text) against `query` by BM25 score,
/// descending. Candidates scoring zero (no shared terms with the query)
/// are dropped.
pub fn bm25_rank(query: &str, candidates: &[(usize, String)]) -> Vec<(usize, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = candidates.iter().map(|(_, text)| tokenize(text)).collect();
    let doc_len: Vec<f64> = docs.iter().map(|d| d.len() as f64).collect();
    let avg_len: f64 = if doc_len.is_empty() {
        0.0
    } else {
        doc_len.iter().sum::<f64>() / doc_len.len() as f64
    };
    let n = docs.len() as f64;

    // Document frequency per unique query term.
    let unique_terms: std::collections::BTreeSet<&str> =
        query_terms.iter().map(String::as_str).collect();
    let df: std::collections::HashMap<&str, f64> = unique_terms
        .iter()
        .map(|&term| {
            let count = docs.iter().filter(|d| d.iter().any(|w| w == term)).count() as f64;
            (term, count)
        })
        .collect();

    let mut scored: Vec<(usize, f64)> = candidates
        .iter()
        .zip(docs.iter())
        .zip(doc_len.iter())
        .map(|(((idx, _), doc), &len)| {
            let score = unique_terms
                .iter()
                .map(|&term| {
                    let term_df = *df.get(term).unwrap_or(&0.0);
                    // +1 floor on IDF numerator/denominator keeps the score
                    // well-defined and non-negative even for terms that
                    // appear in every candidate.
                    let idf = ((n - term_df + 0.5) / (term_df + 0.5) + 1.0).ln();
                    let tf = doc.iter().filter(|w| w.as_str() == term).count() as f64;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let denom = tf + K1 * (1.0 - B + B * (len / avg_len.max(1.0)));
                    idf * (tf * (K1 + 1.0)) / denom
                })
                .sum::<f64>();
            (*idx, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    // Ties broken by recency: candidates are supplied in chronological
    // order, so a higher original index is more recent. Sort descending
    // by score, then by index, so recency wins ties.
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.cmp(&a.0))
    });

    scored
}

/// Tokenize text into lowercase alphanumeric words (minimum 2 characters).
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_basic() {
        let tokens = tokenize("Hello, World! This is a test.");
        assert_eq!(tokens, vec!["hello", "world", "this", "is", "test"]);
    }

    #[test]
    fn tokenize_skips_single_chars() {
        let tokens = tokenize("I am a bot");
        assert_eq!(tokens, vec!["am", "bot"]);
    }

    #[test]
    fn bm25_ranks_exact_term_match_above_unrelated() {
        let candidates = vec![
            (0, "tell me about rust ownership".to_string()),
            (1, "what's the weather like today".to_string()),
        ];
        let ranked = bm25_rank("rust ownership rules", &candidates);
        assert_eq!(ranked[0].0, 0);
    }

    #[test]
    fn bm25_drops_candidates_with_no_shared_terms() {
        let candidates = vec![(0, "completely unrelated text".to_string())];
        let ranked = bm25_rank("rust programming", &candidates);
        assert!(ranked.is_empty());
    }

    #[test]
    fn bm25_empty_query_returns_empty() {
        let candidates = vec![(0, "some text".to_string())];
        assert!(bm25_rank("", &candidates).is_empty());
    }

    #[test]
    fn bm25_empty_candidates_returns_empty() {
        assert!(bm25_rank("query", &[]).is_empty());
    }

    #[test]
    fn bm25_ties_break_by_recency() {
        let candidates = vec![
            (0, "rust programming language".to_string()),
            (5, "rust programming language".to_string()),
        ];
        let ranked = bm25_rank("rust programming", &candidates);
        assert_eq!(ranked[0].0, 5);
    }
}
