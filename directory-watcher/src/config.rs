//! Configuration types for directory watching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

/// Configuration for the watched document directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Path to the directory.
    pub root: PathBuf,

    /// Extensions (without the dot) of files that are reported.
    pub extensions: Vec<String>,

    /// Quiet period before a burst of events for one path is dispatched.
    pub debounce_ms: u64,

    /// Patterns to exclude (wildcard patterns matched against the full path).
    pub exclude_patterns: Vec<String>,

    /// Maximum depth to recurse (None = unlimited).
    pub max_depth: Option<usize>,

    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
}

impl WatchConfig {
    /// Create a new watch config.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: ["pdf", "docx", "txt", "md", "csv"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            debounce_ms: 2000,
            exclude_patterns: Self::default_excludes(),
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Set the reported extensions.
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Set the debounce delay.
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_ms = delay.as_millis() as u64;
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// The debounce delay.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Get default exclude patterns.
    fn default_excludes() -> Vec<String> {
        vec![
            // Version control
            "*/.git/*".to_string(),
            "*/.svn/*".to_string(),
            // Editor and office lock files
            "*/~$*".to_string(),
            "*/.~lock.*".to_string(),
            "*.swp".to_string(),
            "*~".to_string(),
            // System files
            "*/.DS_Store".to_string(),
            "*/Thumbs.db".to_string(),
            // Temporary files
            "*.tmp".to_string(),
        ]
    }

    /// Check if a path should be excluded.
    pub fn should_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.exclude_patterns
            .iter()
            .any(|pattern| WildMatch::new(pattern).matches(&path_str))
    }

    /// Check if a path has one of the reported extensions.
    pub fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
    }

    /// Whether events for `path` should be reported at all.
    pub fn accepts(&self, path: &Path) -> bool {
        self.has_supported_extension(path) && !self.should_exclude(path)
    }
}
