//! Deterministic stand-ins for the external models.

#![allow(dead_code)]

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docqa_embeddings::{Embedding, EmbeddingError, EmbeddingProvider, RerankProvider, normalize};
use docqa_retrieval::{Models, RagConfig, RagService};

pub const DIMENSION: usize = 64;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "in", "is", "it", "its", "of", "on", "the", "to", "what", "which", "who",
];

pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// Hashing bag-of-words embedder. Records every text it embeds.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl HashEmbedder {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().flatten().cloned().collect()
    }
}

pub fn embed_text(text: &str) -> Embedding {
    let mut vector = vec![0.0; DIMENSION];
    for word in words(text) {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        vector[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    normalize(&mut vector);
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, texts: Vec<String>) -> docqa_embeddings::Result<Vec<Embedding>> {
        self.calls.lock().unwrap().push(texts.clone());
        Ok(texts.iter().map(|text| embed_text(text)).collect())
    }
}

/// An embedding server that is down.
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, _texts: Vec<String>) -> docqa_embeddings::Result<Vec<Embedding>> {
        Err(EmbeddingError::ApiRequest("503 Service Unavailable".to_string()))
    }
}

/// An embedding server that accepts requests and never answers.
pub struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    fn name(&self) -> &str {
        "stalled"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, texts: Vec<String>) -> docqa_embeddings::Result<Vec<Embedding>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(texts.iter().map(|text| embed_text(text)).collect())
    }
}

/// Scores a candidate by the share of query words it contains.
#[derive(Default)]
pub struct LexicalReranker {
    pub delay: Option<Duration>,
}

#[async_trait]
impl RerankProvider for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, candidates: &[String]) -> docqa_embeddings::Result<Vec<f32>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let query: HashSet<String> = words(query).into_iter().collect();
        Ok(candidates
            .iter()
            .map(|candidate| {
                if query.is_empty() {
                    return 0.0;
                }
                let candidate: HashSet<String> = words(candidate).into_iter().collect();
                query.intersection(&candidate).count() as f32 / query.len() as f32
            })
            .collect())
    }
}

pub fn config(docs: &Path) -> RagConfig {
    RagConfig::new(docs)
        .with_persist_dir(docs.join(".docqa"))
        .with_dimension(DIMENSION)
}

/// A ready service over `docs` and the embedder it uses.
pub fn service_with(config: RagConfig, reranker: LexicalReranker) -> (RagService, Arc<HashEmbedder>) {
    let embedder = Arc::new(HashEmbedder::default());
    let service = RagService::new(config).unwrap();
    service
        .set_models(Models::new(embedder.clone(), Arc::new(reranker)))
        .unwrap();
    (service, embedder)
}

pub fn service(docs: &Path) -> (RagService, Arc<HashEmbedder>) {
    service_with(config(docs), LexicalReranker::default())
}

pub fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// The three-document corpus: only `a.txt` answers the capital question.
pub fn write_capital_corpus(dir: &Path) {
    write(dir, "a.txt", "Paris is the capital of France.");
    write(dir, "b.txt", "The Eiffel Tower is in Paris.");
    write(dir, "c.txt", "Bananas are yellow.");
}
