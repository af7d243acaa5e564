//! Text extraction from files on disk.
//!
//! Each supported [`FileKind`] maps to one [`Extractor`] implementation.
//! Unknown extensions are rejected before any extractor runs.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExtractionError, Result};

/// Closed set of document kinds the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// `.txt`
    PlainText,
    /// `.md`
    Markdown,
    /// `.csv`
    Csv,
    /// `.docx`
    Docx,
    /// `.pdf`
    Pdf,
}

impl FileKind {
    /// Every supported kind.
    pub const ALL: [FileKind; 5] = [
        FileKind::Pdf,
        FileKind::Docx,
        FileKind::PlainText,
        FileKind::Markdown,
        FileKind::Csv,
    ];

    /// Resolve a kind from an extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" => Some(Self::PlainText),
            "md" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Resolve a kind from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::PlainText => "txt",
            Self::Markdown => "md",
            Self::Csv => "csv",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }

    fn extractor(self) -> &'static dyn Extractor {
        match self {
            Self::PlainText => &PlainTextExtractor,
            Self::Markdown => &MarkdownExtractor,
            Self::Csv => &CsvExtractor,
            Self::Docx => &DocxExtractor,
            Self::Pdf => &PdfExtractor,
        }
    }
}

/// A unit of extracted text with its location in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// The extracted text.
    pub content: String,

    /// Where the text came from.
    pub metadata: ElementMetadata,
}

impl Element {
    /// Create an element without location metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: ElementMetadata::default(),
        }
    }

    /// Set the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.metadata.page = Some(page);
        self
    }

    /// Set the section title.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.metadata.section = Some(section.into());
        self
    }

    /// Set the row number.
    pub fn with_row(mut self, row: usize) -> Self {
        self.metadata.row = Some(row);
        self
    }
}

/// Location metadata for an [`Element`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMetadata {
    /// 1-based page number (paged formats).
    pub page: Option<u32>,

    /// Nearest heading above the text.
    pub section: Option<String>,

    /// 1-based data row (tabular formats).
    pub row: Option<usize>,
}

/// Strategy that turns one kind of file into text elements.
pub trait Extractor: Send + Sync {
    /// Extract all elements from the file at `path`.
    fn extract(&self, path: &Path) -> Result<Vec<Element>>;
}

/// Dispatches paths to the extractor for their [`FileKind`].
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    supported: HashSet<FileKind>,
}

impl DocumentExtractor {
    /// Create an extractor accepting every [`FileKind`].
    pub fn new() -> Self {
        Self {
            supported: FileKind::ALL.into_iter().collect(),
        }
    }

    /// Restrict the accepted kinds to the given extensions. Extensions with
    /// no matching kind are ignored.
    pub fn with_extensions<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            supported: extensions
                .iter()
                .filter_map(|e| FileKind::from_extension(e.as_ref()))
                .collect(),
        }
    }

    /// Resolve the kind of `path`, rejecting unsupported files.
    pub fn kind_of(&self, path: &Path) -> Result<FileKind> {
        FileKind::from_path(path)
            .filter(|kind| self.supported.contains(kind))
            .ok_or_else(|| ExtractionError::Unsupported {
                path: path.to_path_buf(),
            })
    }

    /// Whether `path` would be accepted by [`DocumentExtractor::extract`].
    pub fn is_supported(&self, path: &Path) -> bool {
        self.kind_of(path).is_ok()
    }

    /// Extract the elements of a file.
    pub fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        let kind = self.kind_of(path)?;
        let elements = kind.extractor().extract(path)?;
        debug!(
            "Extracted {} elements from {} ({kind:?})",
            elements.len(),
            path.display()
        );
        Ok(elements)
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| ExtractionError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Plain UTF-8 text; invalid sequences are replaced rather than rejected.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        let text = read_lossy(path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Element::new(text)])
    }
}

/// Markdown split into one element per heading section.
pub struct MarkdownExtractor;

impl MarkdownExtractor {
    fn heading_title(line: &str) -> Option<&str> {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            return None;
        }
        let rest = &trimmed[level..];
        if rest.is_empty() || rest.starts_with(' ') {
            Some(rest.trim())
        } else {
            None
        }
    }

    fn sections(text: &str) -> Vec<Element> {
        let mut elements = Vec::new();
        let mut section: Option<String> = None;
        let mut body = String::new();
        let mut in_code_block = false;

        let mut flush = |section: &Option<String>, body: &mut String| {
            if !body.trim().is_empty() {
                let mut element = Element::new(body.trim().to_string());
                if let Some(title) = section {
                    element = element.with_section(title.clone());
                }
                elements.push(element);
            }
            body.clear();
        };

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }
            if !in_code_block && let Some(title) = Self::heading_title(line) {
                flush(&section, &mut body);
                section = Some(title.to_string()).filter(|t| !t.is_empty());
            }
            body.push_str(line);
            body.push('\n');
        }
        flush(&section, &mut body);

        elements
    }
}

impl Extractor for MarkdownExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        Ok(Self::sections(&read_lossy(path)?))
    }
}

/// CSV where each data row becomes `"col: val; col: val"`.
pub struct CsvExtractor;

impl CsvExtractor {
    /// Serialize one row against its header names.
    pub fn row_to_sentence(headers: &[String], row: &[String]) -> String {
        headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let value = row.get(i).map(String::as_str).unwrap_or_default();
                format!("{header}: {value}")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Extractor for CsvExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| ExtractionError::corrupt(path, e))?;

        let headers: Vec<String> = reader
            .byte_headers()
            .map_err(|e| ExtractionError::corrupt(path, e))?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();

        let mut elements = Vec::new();
        for (i, record) in reader.byte_records().enumerate() {
            let record = record.map_err(|e| ExtractionError::corrupt(path, e))?;
            let row: Vec<String> = record
                .iter()
                .map(|v| String::from_utf8_lossy(v).trim().to_string())
                .collect();
            if row.iter().all(String::is_empty) {
                continue;
            }
            elements.push(Element::new(Self::row_to_sentence(&headers, &row)).with_row(i + 1));
        }

        Ok(elements)
    }
}

static DOCX_PARAGRAPH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<w:p(?:\s[^>]*)?>(.*?)</w:p>").ok());
static DOCX_EMPTY_PARAGRAPH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<w:p(?:\s[^>]*)?/>").ok());
static DOCX_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab/>").ok());
static XML_ENTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9A-Fa-f]+|#[0-9]+|lt|gt|quot|apos|amp);").ok());

/// Word documents: one element per non-empty paragraph of
/// `word/document.xml`.
pub struct DocxExtractor;

impl DocxExtractor {
    /// Decode the predefined XML entities and numeric character references
    /// in one pass. References to invalid code points are kept verbatim.
    fn unescape(text: &str) -> String {
        let Some(entity_re) = XML_ENTITY.as_ref() else {
            return text.to_string();
        };

        entity_re
            .replace_all(text, |caps: &regex_lite::Captures<'_>| {
                let name = &caps[1];
                let decoded = match name {
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "amp" => Some('&'),
                    _ => {
                        let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                            Some(hex) => u32::from_str_radix(hex, 16).ok(),
                            None => name[1..].parse().ok(),
                        };
                        code.and_then(char::from_u32)
                    }
                };
                decoded.map_or_else(|| caps[0].to_string(), String::from)
            })
            .into_owned()
    }

    /// Paragraph texts from the body XML.
    pub fn paragraphs(xml: &str) -> Vec<String> {
        let (Some(paragraph_re), Some(empty_re), Some(run_re)) = (
            DOCX_PARAGRAPH.as_ref(),
            DOCX_EMPTY_PARAGRAPH.as_ref(),
            DOCX_RUN.as_ref(),
        ) else {
            return Vec::new();
        };

        let xml = empty_re.replace_all(xml, "");
        paragraph_re
            .captures_iter(&xml)
            .filter_map(|paragraph| {
                let inner = paragraph.get(1)?.as_str();
                let text: String = run_re
                    .captures_iter(inner)
                    .map(|run| match run.get(1) {
                        Some(t) => Self::unescape(t.as_str()),
                        None => "\t".to_string(),
                    })
                    .collect();
                let text = text.trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .collect()
    }
}

impl Extractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        let file = File::open(path).map_err(|e| ExtractionError::io(path, e))?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| ExtractionError::corrupt(path, e))?;
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| ExtractionError::corrupt(path, e))?
            .read_to_string(&mut xml)
            .map_err(|e| ExtractionError::corrupt(path, e))?;

        Ok(Self::paragraphs(&xml).into_iter().map(Element::new).collect())
    }
}

/// PDF files: one element per page with text.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Element>> {
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::io(path, e))?;

        // pdf-extract panics on some malformed inputs; a bad file must only
        // fail itself.
        let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .map_err(|_| ExtractionError::corrupt(path, "pdf parser panicked"))?
            .map_err(|e| ExtractionError::corrupt(path, e))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| Element::new(text).with_page(i as u32 + 1))
            .collect())
    }
}
