//! Query-time retrieval: rephrase, embed, search, rerank, filter.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docqa_embeddings::{Embedding, EmbeddingError, SearchHit};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::engine::{RagService, normalize_source};
use crate::error::{RagError, Result, RetrievalStage};
use crate::generation::{ChatMessage, Role};
use crate::store::Chunk;

const REPHRASE_INSTRUCTIONS: &str = "Rewrite the user's latest question as one standalone \
search query. Use the conversation only to resolve what the question refers to. Reply with \
the query and nothing else.";

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "am", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by",
    "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or",
    "our", "she", "so", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "us", "was", "we", "were", "what", "when", "where", "which", "who", "whom",
    "why", "will", "with", "would", "you", "your",
];

/// A reranked chunk returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Cross-encoder score against the original query.
    pub rerank_score: f32,

    /// Chunk text.
    pub content: String,

    /// Path of the source file.
    pub source: PathBuf,

    /// File name of the source.
    pub filename: String,

    /// 1-based page, for paged formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Position of the chunk within its source.
    pub chunk_index: usize,
}

impl RetrievalResult {
    fn from_chunk(chunk: Chunk, rerank_score: f32) -> Self {
        Self {
            rerank_score,
            content: chunk.content,
            source: chunk.source,
            filename: chunk.filename,
            page: chunk.page_number,
            chunk_index: chunk.chunk_index,
        }
    }
}

/// A live chunk with its vector similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl RagService {
    /// Retrieve the chunks that best answer `query`.
    ///
    /// With a generator configured and a non-empty `history`, the query is
    /// first rewritten into a standalone search query; rephrasing never
    /// fails the request. Candidates are reranked against the original
    /// query, filtered by score and lexical overlap, and truncated to
    /// `rerank_top_k`.
    pub async fn retrieve(&self, query: &str, history: &[ChatMessage]) -> Result<Vec<RetrievalResult>> {
        let models = self.readiness.models().await?;
        let timeout = self.config.timeouts.request_timeout();

        let search_query = self.rephrase(query, history).await;

        let query_vector = with_timeout(
            timeout,
            RetrievalStage::Embed,
            models.embedder.embed_one(search_query),
        )
        .await?;

        let candidates = with_timeout(
            timeout,
            RetrievalStage::Search,
            self.search_vector(query_vector, self.config.retrieval.retrieval_top_k),
        )
        .await?;

        if candidates.is_empty() {
            debug!("No candidates for query: {query}");
            return Ok(Vec::new());
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|candidate| candidate.chunk.content.clone())
            .collect();
        let scores = with_timeout(
            timeout,
            RetrievalStage::Rerank,
            models.reranker.score(query, &texts),
        )
        .await?;

        if scores.len() != candidates.len() {
            return Err(RagError::Embedding(EmbeddingError::InvalidResponse(format!(
                "reranker returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            ))));
        }

        let chunks = candidates.into_iter().map(|candidate| candidate.chunk).collect();
        let results = rank(query, chunks, scores, &self.config.retrieval);
        debug!(
            "Retrieved {} results for query: {query} ({} candidates)",
            results.len(),
            texts.len()
        );
        Ok(results)
    }

    /// Embed `query` and return the `k` most similar live chunks, without
    /// reranking.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let models = self.readiness.models().await?;
        let query_vector = models.embedder.embed_one(query.to_string()).await?;
        self.search_vector(query_vector, k).await
    }

    /// Chunks of a single source, in order.
    pub async fn chunks_of(&self, path: impl AsRef<std::path::Path>) -> Vec<Chunk> {
        let path = normalize_source(path.as_ref());
        let state = self.state.read().await;
        state
            .store
            .source(&path)
            .map(|entry| {
                entry
                    .positions
                    .iter()
                    .filter_map(|position| state.store.get(*position).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn search_vector(&self, query_vector: Embedding, k: usize) -> Result<Vec<ScoredChunk>> {
        let state = Arc::clone(&self.state).read_owned().await;

        tokio::task::spawn_blocking(move || -> Result<Vec<ScoredChunk>> {
            let hits: Vec<SearchHit> = state
                .index
                .search_filtered(&query_vector, k, |position| state.store.is_live(position))?;

            Ok(hits
                .into_iter()
                .filter_map(|hit| {
                    state.store.get(hit.position).map(|chunk| ScoredChunk {
                        chunk: chunk.clone(),
                        score: hit.score,
                    })
                })
                .collect())
        })
        .await
        .map_err(|e| RagError::Io(std::io::Error::other(e)))?
    }

    /// Rewrite a follow-up question into a standalone search query, falling
    /// back to the question itself on any failure.
    async fn rephrase(&self, query: &str, history: &[ChatMessage]) -> String {
        let turns = self.config.retrieval.rephrase_history_turns;
        let Some(generator) = &self.generator else {
            return query.to_string();
        };
        if history.is_empty() || turns == 0 {
            return query.to_string();
        }

        let messages = rephrase_messages(query, history, turns);
        let timeout = self.config.timeouts.request_timeout();

        match tokio::time::timeout(timeout, generator.complete(messages)).await {
            Ok(Ok(text)) => match clean_rephrased(&text) {
                Some(rephrased) => {
                    debug!("Rephrased query: {rephrased}");
                    rephrased
                }
                None => query.to_string(),
            },
            Ok(Err(e)) => {
                warn!("Query rephrasing failed, using the original query: {e}");
                query.to_string()
            }
            Err(_) => {
                warn!("Query rephrasing timed out, using the original query");
                query.to_string()
            }
        }
    }
}

async fn with_timeout<T, E, F>(limit: Duration, stage: RetrievalStage, future: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    RagError: From<E>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!("Retrieval timed out during {stage}");
            Err(RagError::RetrievalTimeout { stage })
        }
    }
}

/// Messages asking the generator for a standalone search query.
fn rephrase_messages(query: &str, history: &[ChatMessage], turns: usize) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(turns)..];

    let mut conversation = String::new();
    for message in recent {
        let speaker = match message.role {
            Role::System => continue,
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        conversation.push_str(&format!("{speaker}: {}\n", message.content.trim()));
    }

    vec![
        ChatMessage::system(REPHRASE_INSTRUCTIONS),
        ChatMessage::user(format!(
            "Conversation:\n{conversation}\nLatest question: {query}"
        )),
    ]
}

/// First non-empty line of a rephrased query, without wrapping quotes.
fn clean_rephrased(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Lowercase alphanumeric words of `text`, stopwords removed.
pub(crate) fn content_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// Apply the score threshold and the lexical overlap requirement, then
/// order by score. Equal scores keep retrieval order.
pub(crate) fn rank(
    query: &str,
    candidates: Vec<Chunk>,
    scores: Vec<f32>,
    config: &RetrievalConfig,
) -> Vec<RetrievalResult> {
    let query_tokens = content_tokens(query);

    let mut results: Vec<RetrievalResult> = candidates
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| !score.is_nan() && *score >= config.min_rerank_score)
        .filter(|(chunk, _)| {
            query_tokens.is_empty() || !content_tokens(&chunk.content).is_disjoint(&query_tokens)
        })
        .map(|(chunk, score)| RetrievalResult::from_chunk(chunk, score))
        .collect();

    results.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
    results.truncate(config.rerank_top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(content: &str, filename: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: PathBuf::from(format!("/docs/{filename}")),
            filename: filename.to_string(),
            page_number: None,
            chunk_index: 0,
        }
    }

    fn config(min_rerank_score: f32, rerank_top_k: usize) -> RetrievalConfig {
        RetrievalConfig {
            min_rerank_score,
            rerank_top_k,
            ..RetrievalConfig::default()
        }
    }

    #[test]
    fn test_content_tokens_drop_stopwords() {
        let tokens = content_tokens("What is the Capital of France?");
        let mut tokens: Vec<_> = tokens.into_iter().collect();
        tokens.sort();
        assert_eq!(tokens, vec!["capital".to_string(), "france".to_string()]);
    }

    #[test]
    fn test_rank_drops_low_scores() {
        let results = rank(
            "capital France",
            vec![chunk("France capital Paris", "a.txt"), chunk("France capital", "b.txt")],
            vec![0.9, 0.2],
            &config(0.5, 5),
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "a.txt");
    }

    #[test]
    fn test_rank_requires_lexical_overlap() {
        let results = rank(
            "What is the capital of France?",
            vec![
                chunk("The Eiffel Tower is in Paris.", "b.txt"),
                chunk("Paris is the capital of France.", "a.txt"),
            ],
            vec![0.95, 0.9],
            &config(0.5, 5),
        );

        let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[test]
    fn test_rank_skips_overlap_for_stopword_queries() {
        let results = rank(
            "what is it",
            vec![chunk("Anything at all.", "a.txt")],
            vec![0.8],
            &config(0.5, 5),
        );
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_rank_sorts_and_truncates_stably() {
        let results = rank(
            "report",
            vec![
                chunk("report one", "1.txt"),
                chunk("report two", "2.txt"),
                chunk("report three", "3.txt"),
                chunk("report four", "4.txt"),
            ],
            vec![0.6, 0.9, 0.6, 0.7],
            &config(0.5, 3),
        );

        let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["2.txt", "4.txt", "1.txt"]);
    }

    #[test]
    fn test_rank_drops_nan_scores() {
        let results = rank("report", vec![chunk("report", "a.txt")], vec![f32::NAN], &config(0.0, 5));
        assert!(results.is_empty());
    }

    #[test]
    fn test_rephrase_messages_keep_recent_turns() {
        let history = vec![
            ChatMessage::user("Tell me about Paris."),
            ChatMessage::assistant("Paris is the capital of France."),
            ChatMessage::user("And its population?"),
            ChatMessage::assistant("About two million."),
        ];

        let messages = rephrase_messages("What about Lyon?", &history, 2);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[1].content,
            "Conversation:\nUser: And its population?\nAssistant: About two million.\n\nLatest question: What about Lyon?"
        );
    }

    #[test]
    fn test_clean_rephrased() {
        assert_eq!(
            clean_rephrased("\n  \"population of Lyon\"  \nextra"),
            Some("population of Lyon".to_string())
        );
        assert_eq!(clean_rephrased("  \n \"\" "), None);
    }
}
