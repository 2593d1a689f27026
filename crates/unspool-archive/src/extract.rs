//! Secure extraction of archive entries.
//!
//! Every entry name is resolved against a [`DestinationRoot`] before any
//! filesystem call touches the path derived from it, and symlinks already on
//! disk below the root are never followed. Entries are streamed one at a
//! time; nothing buffers a whole archive.
//!
//! # Platform Behavior
//!
//! **Unix**: stored permission bits are applied at creation (subject to the
//! process umask) and symlinks are created with their literal target.
//!
//! **Windows**: permission bits are ignored; symlinks are created as file or
//! directory links depending on the target's trailing separator.

use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::codec::Tagged;
use crate::entry::{ArchiveEntry, ArchiveReport, EntryKind, ExtractedEntry};
use crate::error::{Error, Layer, Result};
use crate::format::ArchiveFormat;
use crate::sanitize::DestinationRoot;

mod tar;
mod zip;

pub use self::tar::{TarArchive, TarSource};
pub use self::zip::ZipSource;

/// An entry read from the archive, bound to its content stream.
///
/// The reader yields exactly this entry's bytes; dropping it early lets the
/// source skip the remainder on the next call.
pub struct PendingEntry<R> {
    pub entry: ArchiveEntry,
    pub reader: R,
}

/// Archive-specific entry source.
///
/// One forward-only iteration contract shared by every archive backend, so
/// that [`extract`] never needs to know which format it is reading.
pub trait EntrySource {
    type Reader<'a>: Read
    where
        Self: 'a;

    /// The next entry, `None` at end of archive.
    fn next_entry(&mut self) -> Option<Result<PendingEntry<Self::Reader<'_>>>>;

    fn format(&self) -> ArchiveFormat;
}

fn format_layer(format: ArchiveFormat) -> Layer {
    match format {
        ArchiveFormat::Tar => Layer::Tar,
        ArchiveFormat::Zip => Layer::Zip,
    }
}

/// Extract every entry of `source` below `root`.
///
/// Aborts on the first failure; entries already written stay on disk.
pub fn extract<S: EntrySource>(source: &mut S, root: &DestinationRoot) -> Result<ArchiveReport> {
    let format = source.format();
    let layer = format_layer(format);
    let mut entries = Vec::new();
    let mut total_bytes = 0u64;

    while let Some(pending) = source.next_entry() {
        let PendingEntry { entry, reader } = pending?;
        let mut reader = Tagged::new(reader, layer);

        let target = root.resolve(&entry.name, entry.is_directory())?;
        debug!(entry = %entry.name.display(), kind = %entry.kind, "extracting");

        let written = match &entry.kind {
            EntryKind::Directory => {
                root.check_no_symlinks(&target, &entry.name)?;
                create_directory(&target, entry.mode)?;
                0
            }
            EntryKind::File => {
                clear_leaf(root, &target, &entry.name)?;
                write_file(&entry, &mut reader, &target, layer)?
            }
            EntryKind::Symlink => {
                clear_leaf(root, &target, &entry.name)?;
                write_symlink(&entry, &mut reader, &target, layer)?;
                0
            }
            EntryKind::Unsupported(kind) => {
                return Err(Error::UnsupportedEntry {
                    entry: entry.name.clone(),
                    kind: kind.clone(),
                });
            }
        };

        total_bytes += written;
        entries.push(ExtractedEntry {
            name: entry.name,
            target_path: target,
            kind: entry.kind,
            size: written,
        });
    }

    Ok(ArchiveReport {
        format,
        entry_count: entries.len(),
        total_bytes,
        entries,
    })
}

/// Directory permission bits used at creation.
///
/// The owner always gets write and search so later entries can populate the
/// directory; group and other get search whenever they have any access.
pub fn dir_mode(mode: u32) -> u32 {
    let mut mode = mode & 0o7777;
    if mode & 0o007 != 0 {
        mode |= 0o001;
    }
    if mode & 0o070 != 0 {
        mode |= 0o010;
    }
    mode | 0o300
}

fn create_directory(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(dir_mode(mode));
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder
        .create(path)
        .map_err(|e| Error::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Make `target` safe to create as a file or link.
///
/// No existing ancestor may be a symlink, and a symlink already sitting at
/// `target` is unlinked rather than followed.
fn clear_leaf(root: &DestinationRoot, target: &Path, name: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        root.check_no_symlinks(parent, name)?;
    }
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!(entry = %name.display(), "replacing existing symlink");
            fs::remove_file(target).map_err(|e| Error::ExtractionFailed {
                path: name.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.exists() => {
            fs::create_dir_all(parent).map_err(|e| Error::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

fn write_file<R: Read>(
    entry: &ArchiveEntry,
    reader: &mut R,
    target: &Path,
    layer: Layer,
) -> Result<u64> {
    ensure_parent(target)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(entry.mode & 0o7777);
    }
    let mut file = options.open(target).map_err(|e| Error::ExtractionFailed {
        path: entry.name.clone(),
        source: e,
    })?;

    let written = io::copy(reader, &mut file)
        .map_err(|e| Error::from_copy(layer, entry.name.clone(), e))?;
    drop(file);

    if entry.size != 0 && written != entry.size {
        return Err(Error::SizeMismatch {
            entry: entry.name.clone(),
            written,
            expected: entry.size,
        });
    }

    if let Some(mtime) = entry.mtime
        && mtime != FileTime::zero()
        && let Err(e) = filetime::set_file_times(target, mtime, mtime)
    {
        warn!(entry = %entry.name.display(), error = %e, "could not set modification time");
    }

    Ok(written)
}

fn write_symlink<R: Read>(
    entry: &ArchiveEntry,
    reader: &mut R,
    target: &Path,
    layer: Layer,
) -> Result<()> {
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .map_err(|e| Error::from_read(layer, e))?;
    let link_target = link_target_from_bytes(raw);

    ensure_parent(target)?;
    symlink(&link_target, target).map_err(|e| Error::SymlinkCreationFailed {
        target: link_target,
        link: entry.name.clone(),
        source: e,
    })
}

#[cfg(unix)]
fn link_target_from_bytes(raw: Vec<u8>) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(raw))
}

#[cfg(not(unix))]
fn link_target_from_bytes(raw: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&raw).into_owned())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    use std::os::windows::fs;
    let is_dir_target = target.to_string_lossy().ends_with(['/', '\\']);
    if is_dir_target {
        fs::symlink_dir(target, link)
    } else {
        fs::symlink_file(target, link)
    }
}
