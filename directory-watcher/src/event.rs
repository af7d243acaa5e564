//! File events from directory watching.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file system event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file.
    pub path: PathBuf,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// The indexing action this event calls for.
    pub fn action(&self) -> FileAction {
        match self.kind {
            FileEventKind::Created => FileAction::Process(self.path.clone()),
            FileEventKind::Modified => FileAction::Update(self.path.clone()),
            FileEventKind::Deleted => FileAction::Remove(self.path.clone()),
        }
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// File was created (or renamed into place).
    Created,

    /// File contents changed.
    Modified,

    /// File was deleted (or renamed away).
    Deleted,
}

impl FileEventKind {
    /// Map a notify event kind, ignoring access and metadata-only changes.
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        use notify::event::{ModifyKind, RenameMode};

        match kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Self::Deleted),
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Self::Created),
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => None,
            notify::EventKind::Modify(_) => Some(Self::Modified),
            notify::EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Convert a raw notify event into file events.
///
/// A rename carrying both paths becomes a delete of the old path and a
/// create of the new one.
pub fn from_notify(event: &notify::Event) -> Vec<FileEvent> {
    use notify::event::{ModifyKind, RenameMode};

    if let notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind
        && let [from, to] = event.paths.as_slice()
    {
        return vec![
            FileEvent::new(FileEventKind::Deleted, from),
            FileEvent::new(FileEventKind::Created, to),
        ];
    }

    let Some(kind) = FileEventKind::from_notify(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .map(|path| FileEvent::new(kind, path))
        .collect()
}

/// What the indexer should do with a path once its events have settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "path")]
pub enum FileAction {
    /// Index the file unless it is already indexed unchanged.
    Process(PathBuf),

    /// Re-extract the file and replace its chunks.
    Update(PathBuf),

    /// Drop the file's chunks.
    Remove(PathBuf),
}

impl FileAction {
    /// The path this action applies to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Process(path) | Self::Update(path) | Self::Remove(path) => path,
        }
    }
}
