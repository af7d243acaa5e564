//! Context assembly: turn reranked results into a bounded, cited prompt
//! context.
//!
//! The first unique result becomes the primary source and is included in
//! full. Later results are appended as short supporting previews while the
//! word-count estimate stays within `max_tokens - safety_margin_tokens`.
//! Every `[Source n]` citation in the text refers to `sources[n - 1]`.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ContextConfig;
use crate::engine::RagService;
use crate::pipeline::RetrievalResult;

/// A citable source of the assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based citation number.
    pub index: usize,

    /// Path of the source file.
    pub source: PathBuf,

    /// File name of the source.
    pub filename: String,

    /// 1-based page, for paged formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Rerank score of the cited chunk.
    pub rerank_score: f32,
}

impl SourceRef {
    /// `filename (page N)`, or just the file name.
    pub fn label(&self) -> String {
        match self.page {
            Some(page) => format!("{} (page {page})", self.filename),
            None => self.filename.clone(),
        }
    }
}

/// An assembled context and the sources it cites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub context: String,
    pub sources: Vec<SourceRef>,
}

impl AssembledContext {
    /// Whether no result made it into the context.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Estimated token count of the context.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.context)
    }
}

/// Formats retrieval results into a prompt context.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    safety_margin_tokens: usize,
    preview_chars: usize,
}

impl ContextBuilder {
    /// Create a builder from the context configuration.
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            safety_margin_tokens: config.safety_margin_tokens,
            preview_chars: config.preview_chars,
        }
    }

    /// Assemble a context from `results` within `max_tokens`.
    pub fn build(&self, results: &[RetrievalResult], max_tokens: usize) -> AssembledContext {
        let mut seen = HashSet::new();
        let unique: Vec<&RetrievalResult> = results
            .iter()
            .filter(|result| seen.insert(result.content.as_str()))
            .collect();

        let Some((primary, supporting)) = unique.split_first() else {
            return AssembledContext::default();
        };

        let mut sources = vec![source_ref(1, primary)];
        let mut context = format!(
            "**Primary Source:** [Source 1] {}\n",
            sources[0].label()
        );
        if let Some(facts) = key_facts(&primary.content) {
            context.push_str(&format!("Key Facts: {facts}\n"));
        }
        context.push_str(&format!(
            "Relevant Information:\n---\n{}\n---\n",
            primary.content
        ));

        let limit = max_tokens.saturating_sub(self.safety_margin_tokens);
        let mut tokens = estimate_tokens(&context);

        if !supporting.is_empty() && tokens < limit {
            let header = "\n**Supporting Evidence:**\n";
            context.push_str(header);
            tokens += estimate_tokens(header);

            for result in supporting {
                let index = sources.len() + 1;
                let line = format!(
                    "- [Source {index}] From {}: \"{}...\"\n",
                    result.filename,
                    preview(&result.content, self.preview_chars)
                );
                let line_tokens = estimate_tokens(&line);
                if tokens + line_tokens > limit {
                    break;
                }

                context.push_str(&line);
                tokens += line_tokens;
                sources.push(source_ref(index, result));
            }
        }

        AssembledContext { context, sources }
    }
}

impl RagService {
    /// Assemble a context from `results` within `max_tokens`, using the
    /// configured safety margin and preview length.
    pub fn build_context(&self, results: &[RetrievalResult], max_tokens: usize) -> AssembledContext {
        ContextBuilder::new(&self.config.context).build(results, max_tokens)
    }
}

/// Whitespace word count.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

fn source_ref(index: usize, result: &RetrievalResult) -> SourceRef {
    SourceRef {
        index,
        source: result.source.clone(),
        filename: result.filename.clone(),
        page: result.page,
        rerank_score: result.rerank_score,
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    content
        .chars()
        .take(max_chars)
        .collect::<String>()
        .replace('\n', " ")
}

/// Structured `column: value` pairs of a tabular chunk as a JSON object,
/// empty values dropped. Chunks that are not `; `-separated pairs have no
/// key facts.
fn key_facts(content: &str) -> Option<String> {
    if content.contains('\n') {
        return None;
    }

    let mut facts = Vec::new();
    for pair in content.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once(':')?;
        let key = key.trim();
        if key.is_empty() || key.len() > 64 {
            return None;
        }
        let value = value.trim();
        if !value.is_empty() {
            facts.push(format!(
                "{}: {}",
                serde_json::Value::from(key),
                serde_json::Value::from(value)
            ));
        }
    }

    (!facts.is_empty()).then(|| format!("{{{}}}", facts.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(content: &str, filename: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            rerank_score: score,
            content: content.to_string(),
            source: PathBuf::from(format!("/docs/{filename}")),
            filename: filename.to_string(),
            page: None,
            chunk_index: 0,
        }
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(&ContextConfig::default())
    }

    #[test]
    fn test_empty_results() {
        let assembled = builder().build(&[], 3500);
        assert!(assembled.is_empty());
        assert_eq!(assembled.context, "");
    }

    #[test]
    fn test_primary_and_supporting_format() {
        let mut primary = result("Paris is the capital of France.", "a.pdf", 0.9);
        primary.page = Some(3);
        let results = vec![primary, result("France is in Europe.", "b.txt", 0.7)];

        let assembled = builder().build(&results, 3500);

        assert_eq!(
            assembled.context,
            "**Primary Source:** [Source 1] a.pdf (page 3)\n\
             Relevant Information:\n---\nParis is the capital of France.\n---\n\
             \n**Supporting Evidence:**\n\
             - [Source 2] From b.txt: \"France is in Europe....\"\n"
        );
        let names: Vec<_> = assembled.sources.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.txt"]);
    }

    #[test]
    fn test_duplicate_content_is_kept_once() {
        let results = vec![
            result("Same text.", "a.txt", 0.9),
            result("Other text.", "b.txt", 0.8),
            result("Same text.", "c.txt", 0.7),
        ];

        let assembled = builder().build(&results, 3500);

        let names: Vec<_> = assembled.sources.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(assembled.context.matches("Same text.").count(), 1);
    }

    #[test]
    fn test_citations_match_source_positions() {
        let results: Vec<_> = (0..5)
            .map(|i| result(&format!("fact number {i}"), &format!("{i}.txt"), 0.9))
            .collect();

        let assembled = builder().build(&results, 3500);

        assert_eq!(assembled.sources.len(), 5);
        for (position, source) in assembled.sources.iter().enumerate() {
            assert_eq!(source.index, position + 1);
            let citation = format!("[Source {}] ", source.index);
            let line = assembled
                .context
                .lines()
                .find(|line| line.contains(&citation))
                .unwrap();
            assert!(line.contains(&source.filename));
        }
    }

    #[test]
    fn test_supporting_lines_stop_at_budget() {
        let long = "word ".repeat(50);
        let results = vec![
            result("primary fact", "a.txt", 0.9),
            result(&long, "b.txt", 0.8),
            result(&long, "c.txt", 0.7),
        ];
        let builder = ContextBuilder {
            safety_margin_tokens: 0,
            preview_chars: 400,
        };

        let primary_only = builder.build(&results[..1], 1000);
        let budget = primary_only.estimated_tokens() + 2 + 60;
        let assembled = builder.build(&results, budget);

        assert_eq!(assembled.sources.len(), 2);
        assert!(assembled.estimated_tokens() <= budget);
    }

    #[test]
    fn test_larger_budget_never_drops_sources() {
        let results: Vec<_> = (0..5)
            .map(|i| result(&"token ".repeat(20 * (i + 1)), &format!("{i}.txt"), 0.9))
            .collect();

        let mut previous = 0;
        for max_tokens in (0..1200).step_by(25) {
            let assembled = builder().build(&results, max_tokens);
            assert!(assembled.sources.len() >= previous);
            assert!(!assembled.is_empty());
            previous = assembled.sources.len();
        }
        assert_eq!(previous, 5);
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("a\nb", 10), "a b");
    }

    #[test]
    fn test_key_facts_from_tabular_chunk() {
        assert_eq!(
            key_facts("name: Ada; role: engineer; team: ").as_deref(),
            Some(r#"{"name": "Ada", "role": "engineer"}"#)
        );
        assert_eq!(key_facts("Plain prose without pairs."), None);
        assert_eq!(key_facts("a: b\nc: d"), None);
    }

    #[test]
    fn test_key_facts_in_primary_block() {
        let results = vec![result("city: Paris; country: France", "cities.csv", 0.9)];
        let assembled = builder().build(&results, 3500);
        assert!(
            assembled
                .context
                .contains("Key Facts: {\"city\": \"Paris\", \"country\": \"France\"}\n")
        );
    }
}
