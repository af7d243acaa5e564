//! Recursive text chunking for retrieval.
//!
//! Text is split on paragraph boundaries first, falling back to sentences
//! and then to words when a unit does not fit. Small pieces are merged
//! forward until the budget is reached, and every chunk after the first is
//! prefixed with a word-aligned tail of its predecessor.
//!
//! All sizes are measured in characters.

use serde::{Deserialize, Serialize};

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk size, overlap included.
    pub chunk_size: usize,

    /// Characters of trailing context carried into the next chunk.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

/// Cleans and splits document text.
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    /// Create a chunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Normalize whitespace, then split.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        split(
            &clean_text(text),
            self.config.chunk_size,
            self.config.chunk_overlap,
        )
    }
}

/// Normalize line endings and whitespace.
///
/// Runs of spaces and tabs collapse to one space, lines are trimmed, and
/// runs of blank lines collapse to a single blank line so paragraph
/// boundaries survive.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(text.len());
    let mut previous_blank = true;
    for line in text.lines() {
        let line = line
            .split([' ', '\t'])
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if line.is_empty() {
            if !previous_blank {
                out.push('\n');
            }
            previous_blank = true;
            continue;
        }

        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
        previous_blank = false;
    }

    out.trim_end().to_string()
}

/// Split `text` into chunks of at most `max_size` characters.
///
/// Adjacent chunks share up to `overlap` characters of trailing context;
/// overlap is capped at half of `max_size`. Whitespace-only input yields no
/// chunks. The output depends only on the arguments.
pub fn split(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_size = max_size.max(1);
    let overlap = overlap.min(max_size / 2);
    let budget = max_size - overlap;

    let bodies = merge(pieces(text, budget), budget);

    let mut chunks = Vec::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        let tail = match i {
            0 => "",
            // One character is reserved for the joining space.
            _ => tail(&bodies[i - 1], overlap.saturating_sub(1)),
        };
        if tail.is_empty() {
            chunks.push(body.clone());
        } else {
            chunks.push(format!("{tail} {body}"));
        }
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// A unit that fits the budget, tagged with whether it opens a paragraph.
struct Piece {
    text: String,
    paragraph_start: bool,
}

fn pieces(text: &str, budget: usize) -> Vec<Piece> {
    let mut out = Vec::new();
    for paragraph in paragraphs(text) {
        let units = if char_len(&paragraph) <= budget {
            vec![paragraph]
        } else {
            sentences(&paragraph)
                .into_iter()
                .flat_map(|sentence| {
                    if char_len(&sentence) <= budget {
                        vec![sentence]
                    } else {
                        wrap_words(&sentence, budget)
                    }
                })
                .collect()
        };

        for (i, unit) in units.into_iter().enumerate() {
            out.push(Piece {
                text: unit,
                paragraph_start: i == 0,
            });
        }
    }
    out
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Sentence boundaries fall after `.`, `!` or `?` followed by whitespace.
fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && let Some((next, n)) = chars.peek().copied()
            && n.is_whitespace()
        {
            let sentence = paragraph[start..next].trim();
            if !sentence.is_empty() {
                out.push(sentence.to_string());
            }
            start = next;
        }
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

/// Greedy word wrap; a single word longer than `budget` is hard-split.
fn wrap_words(sentence: &str, budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut line = String::new();
    for word in sentence.split_whitespace() {
        if char_len(word) > budget {
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(budget) {
                out.push(part.iter().collect());
            }
            continue;
        }

        if line.is_empty() {
            line.push_str(word);
        } else if char_len(&line) + 1 + char_len(word) <= budget {
            line.push(' ');
            line.push_str(word);
        } else {
            out.push(std::mem::replace(&mut line, word.to_string()));
        }
    }
    if !line.is_empty() {
        out.push(line);
    }
    out
}

fn merge(pieces: Vec<Piece>, budget: usize) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece.text;
            continue;
        }

        let separator = if piece.paragraph_start { "\n\n" } else { " " };
        if char_len(&current) + char_len(separator) + char_len(&piece.text) <= budget {
            current.push_str(separator);
            current.push_str(&piece.text);
        } else {
            bodies.push(std::mem::replace(&mut current, piece.text));
        }
    }
    if !current.is_empty() {
        bodies.push(current);
    }
    bodies
}

/// The last `n` characters of `body`, advanced to a word boundary when the
/// cut lands inside a word.
fn tail(body: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(body);
    if total <= n {
        return body.trim();
    }

    let start = body
        .char_indices()
        .nth(total - n)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    let raw = &body[start..];

    let cut_mid_word = body[..start]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    if !cut_mid_word {
        return raw.trim();
    }

    match raw.find(char::is_whitespace) {
        Some(ws) => raw[ws..].trim(),
        None => raw.trim(),
    }
}
