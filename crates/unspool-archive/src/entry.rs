use std::fmt;
use std::path::PathBuf;

use filetime::FileTime;

use crate::format::ArchiveFormat;

/// Metadata of one archive member, as stored by the archive.
///
/// `name` is untrusted: it has not been checked against the destination.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub name: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    pub mtime: Option<FileTime>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<PathBuf>, kind: EntryKind, mode: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            mode,
            size,
            mtime: None,
        }
    }

    pub fn with_mtime(mut self, mtime: Option<FileTime>) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Link target is the entry's content.
    Symlink,
    /// Anything else; carries a description of the stored type.
    Unsupported(String),
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Directory => f.write_str("directory"),
            EntryKind::Symlink => f.write_str("symlink"),
            EntryKind::Unsupported(kind) => f.write_str(kind),
        }
    }
}

/// An entry as materialized on disk.
#[derive(Clone, Debug)]
pub struct ExtractedEntry {
    pub name: PathBuf,
    pub target_path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct ArchiveReport {
    pub format: ArchiveFormat,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub entries: Vec<ExtractedEntry>,
}
