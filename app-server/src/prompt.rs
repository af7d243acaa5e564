//! Answer prompts and answer post-processing.

use std::sync::LazyLock;

use docqa_retrieval::ChatMessage;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Answer shown when retrieval finds nothing relevant.
pub const NO_DOCUMENTS_ANSWER: &str = "No relevant documents found.";

const BASIC_TEMPLATE: &str = "You are a helpful AI assistant.
Based ONLY on the provided context, answer the user's question clearly and concisely.
Cite sources immediately after facts using brackets, e.g., [Source 1].
If the context does not contain the answer, say: \"I cannot answer based on the provided documents.\"
Do NOT use any external knowledge.

Context:
{context}

Question: {query}
Answer:";

const ADVANCED_TEMPLATE: &str = "### INSTRUCTIONS FOR AI ASSISTANT ###
You are an expert technical writer. Provide a clear, concise, and well-structured answer synthesizing the information from the Context to address the Question.

1. Keep answers brief and focused; avoid unnecessary details.
2. Synthesize information into a cohesive narrative. Do NOT just summarize or repeat.
3. Cite all sources immediately after relevant facts or paragraphs as [Source 1, 3].
4. If the context lacks the necessary information, state clearly: \"I cannot provide an answer based on the available documents.\"
5. Avoid adding any information not present in the context.

### Context ###
{context}

### Question ###
{query}

### Answer ###
";

static CITATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[Source \d+\]").ok());

/// Instruction style for answer prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// Short answer-from-context instructions.
    Basic,

    /// Structured instructions asking for a synthesized, cited answer.
    #[default]
    Advanced,
}

impl PromptStyle {
    fn template(self) -> &'static str {
        match self {
            Self::Basic => BASIC_TEMPLATE,
            Self::Advanced => ADVANCED_TEMPLATE,
        }
    }

    /// Fill the template with an assembled context and the question.
    pub fn render(self, context: &str, query: &str) -> String {
        self.template()
            .replace("{context}", context)
            .replace("{query}", query)
    }

    /// The prompt as a single user message.
    pub fn messages(self, context: &str, query: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(self.render(context, query))]
    }
}

/// Collapse runs of the same adjacent citation, so `[Source 1][Source 1]`
/// becomes `[Source 1]`, and trim the answer.
pub fn collapse_repeated_citations(answer: &str) -> String {
    let Some(citation) = CITATION.as_ref() else {
        return answer.trim().to_string();
    };

    let mut out = String::with_capacity(answer.len());
    let mut last = 0;
    let mut previous: Option<(usize, &str)> = None;

    for found in citation.find_iter(answer) {
        let repeat = previous.is_some_and(|(end, text)| end == found.start() && text == found.as_str());
        out.push_str(&answer[last..found.start()]);
        if !repeat {
            out.push_str(found.as_str());
        }
        last = found.end();
        previous = Some((found.end(), found.as_str()));
    }
    out.push_str(&answer[last..]);

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_fills_placeholders() {
        let prompt = PromptStyle::Basic.render("**Primary Source:** [Source 1] a.txt", "Why?");
        assert!(prompt.contains("Context:\n**Primary Source:** [Source 1] a.txt\n"));
        assert!(prompt.ends_with("Question: Why?\nAnswer:"));
        assert!(!prompt.contains("{query}"));
    }

    #[test]
    fn test_advanced_is_default() {
        let messages = PromptStyle::default().messages("ctx", "q");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("### INSTRUCTIONS FOR AI ASSISTANT ###"));
    }

    #[test]
    fn test_collapse_repeated_citations() {
        assert_eq!(
            collapse_repeated_citations(" Paris [Source 1][Source 1][Source 1]. "),
            "Paris [Source 1]."
        );
        assert_eq!(
            collapse_repeated_citations("A [Source 1][Source 2] B [Source 1]"),
            "A [Source 1][Source 2] B [Source 1]"
        );
        assert_eq!(
            collapse_repeated_citations("A [Source 1] [Source 1]"),
            "A [Source 1] [Source 1]"
        );
    }
}
