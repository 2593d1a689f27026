use std::io::{self, Cursor, Read};

use filetime::FileTime;
use tar::EntryType;
use tracing::debug;

use crate::entry::{ArchiveEntry, EntryKind};
use crate::error::{Error, Layer, Result};
use crate::extract::{EntrySource, PendingEntry};
use crate::format::ArchiveFormat;

/// Owns the sequential tar reader; borrow it with [`TarArchive::entries`].
pub struct TarArchive<R: Read> {
    archive: tar::Archive<R>,
}

impl<R: Read> TarArchive<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: tar::Archive::new(reader),
        }
    }

    pub fn entries(&mut self) -> Result<TarSource<'_, R>> {
        let entries = self.archive.entries().map_err(|e| Error::from_read(Layer::Tar, e))?;
        Ok(TarSource { entries })
    }
}

pub struct TarSource<'a, R: 'a + Read> {
    entries: tar::Entries<'a, R>,
}

/// Content of a tar member.
///
/// Tar keeps symlink targets in the header rather than the body; they are
/// served as the entry's content so every backend looks the same to the
/// extractor.
pub enum TarEntryReader<'a, R: 'a + Read> {
    Body(tar::Entry<'a, R>),
    LinkName(Cursor<Vec<u8>>),
}

impl<'a, R: Read> Read for TarEntryReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Body(entry) => entry.read(buf),
            Self::LinkName(cursor) => cursor.read(buf),
        }
    }
}

fn kind_of(entry_type: EntryType) -> Option<EntryKind> {
    let kind = match entry_type {
        EntryType::Regular | EntryType::Continuous => EntryKind::File,
        EntryType::Directory => EntryKind::Directory,
        EntryType::Symlink => EntryKind::Symlink,
        // metadata for the archive as a whole, not a member
        EntryType::XGlobalHeader => return None,
        EntryType::Link => EntryKind::Unsupported("hard link".into()),
        EntryType::Char => EntryKind::Unsupported("character device".into()),
        EntryType::Block => EntryKind::Unsupported("block device".into()),
        EntryType::Fifo => EntryKind::Unsupported("fifo".into()),
        other => EntryKind::Unsupported(format!("tar type {:?}", other.as_byte() as char)),
    };
    Some(kind)
}

impl<'a, R: Read + 'a> TarSource<'a, R> {
    fn read_entry(&mut self) -> Option<Result<PendingEntry<TarEntryReader<'a, R>>>> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(Error::from_read(Layer::Tar, e))),
            };

            let header = entry.header();
            let entry_type = header.entry_type();
            let Some(kind) = kind_of(entry_type) else {
                debug!("skipping pax global header");
                continue;
            };

            let name = match entry.path() {
                Ok(path) => path.into_owned(),
                Err(e) => return Some(Err(Error::from_read(Layer::Tar, e))),
            };
            let mode = header.mode().unwrap_or(0o644) & 0o7777;
            let mtime = header
                .mtime()
                .ok()
                .filter(|&secs| secs != 0)
                .and_then(|secs| i64::try_from(secs).ok())
                .map(|secs| FileTime::from_unix_time(secs, 0));

            let (size, reader) = if kind == EntryKind::Symlink {
                let target = match entry.link_name_bytes() {
                    Some(target) => target.into_owned(),
                    None => Vec::new(),
                };
                (0, TarEntryReader::LinkName(Cursor::new(target)))
            } else {
                (entry.size(), TarEntryReader::Body(entry))
            };

            let entry = ArchiveEntry::new(name, kind, mode, size).with_mtime(mtime);
            return Some(Ok(PendingEntry { entry, reader }));
        }
    }
}

impl<'a, R: Read + 'a> EntrySource for TarSource<'a, R> {
    // Entries borrow the archive for 'a, not the source.
    type Reader<'b>
        = TarEntryReader<'a, R>
    where
        Self: 'b;

    fn next_entry(&mut self) -> Option<Result<PendingEntry<Self::Reader<'_>>>> {
        self.read_entry()
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(f: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        f(&mut builder);
        builder.into_inner().unwrap()
    }

    fn header(entry_type: EntryType, size: u64, mode: u32) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mode(mode);
        header.set_mtime(1_700_000_000);
        header
    }

    #[test]
    fn yields_uniform_entries() {
        let data = build(|b| {
            let mut dir = header(EntryType::Directory, 0, 0o755);
            b.append_data(&mut dir, "a/", io::empty()).unwrap();

            let mut file = header(EntryType::Regular, 2, 0o644);
            b.append_data(&mut file, "a/file.txt", &b"hi"[..]).unwrap();

            let mut link = header(EntryType::Symlink, 0, 0o777);
            b.append_link(&mut link, "link", "a/file.txt").unwrap();
        });

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();

        let dir = source.next_entry().unwrap().unwrap();
        assert_eq!(dir.entry.kind, EntryKind::Directory);
        assert_eq!(dir.entry.name.as_path(), std::path::Path::new("a"));
        assert_eq!(dir.entry.mode, 0o755);
        assert_eq!(dir.entry.mtime, Some(FileTime::from_unix_time(1_700_000_000, 0)));
        drop(dir);

        let mut file = source.next_entry().unwrap().unwrap();
        assert_eq!(file.entry.kind, EntryKind::File);
        assert_eq!(file.entry.size, 2);
        let mut content = String::new();
        file.reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi");
        drop(file);

        let mut link = source.next_entry().unwrap().unwrap();
        assert_eq!(link.entry.kind, EntryKind::Symlink);
        let mut target = String::new();
        link.reader.read_to_string(&mut target).unwrap();
        assert_eq!(target, "a/file.txt");
        drop(link);

        assert!(source.next_entry().is_none());
    }

    #[test]
    fn unread_content_is_skipped() {
        let data = build(|b| {
            let mut first = header(EntryType::Regular, 4, 0o644);
            b.append_data(&mut first, "first", &b"1234"[..]).unwrap();
            let mut second = header(EntryType::Regular, 2, 0o644);
            b.append_data(&mut second, "second", &b"56"[..]).unwrap();
        });

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();
        drop(source.next_entry().unwrap().unwrap());

        let mut second = source.next_entry().unwrap().unwrap();
        assert_eq!(second.entry.name.to_str(), Some("second"));
        let mut content = Vec::new();
        second.reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"56");
    }

    #[test]
    fn special_files_are_unsupported() {
        let data = build(|b| {
            let mut fifo = header(EntryType::Fifo, 0, 0o644);
            b.append_data(&mut fifo, "pipe", io::empty()).unwrap();
            let mut hard = header(EntryType::Link, 0, 0o644);
            b.append_link(&mut hard, "hard", "pipe").unwrap();
        });

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();
        let fifo = source.next_entry().unwrap().unwrap();
        assert_eq!(fifo.entry.kind, EntryKind::Unsupported("fifo".into()));
        drop(fifo);
        let hard = source.next_entry().unwrap().unwrap();
        assert_eq!(hard.entry.kind, EntryKind::Unsupported("hard link".into()));
    }

    #[test]
    fn global_headers_are_skipped() {
        let data = build(|b| {
            let mut global = header(EntryType::XGlobalHeader, 0, 0o644);
            b.append_data(&mut global, "pax_global_header", io::empty()).unwrap();
            let mut file = header(EntryType::Regular, 1, 0o644);
            b.append_data(&mut file, "only", &b"x"[..]).unwrap();
        });

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();
        let only = source.next_entry().unwrap().unwrap();
        assert_eq!(only.entry.name.to_str(), Some("only"));
        drop(only);
        assert!(source.next_entry().is_none());
    }

    #[test]
    fn zero_mtime_is_absent() {
        let data = build(|b| {
            let mut file = header(EntryType::Regular, 1, 0o644);
            file.set_mtime(0);
            b.append_data(&mut file, "old", &b"x"[..]).unwrap();
        });

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();
        let old = source.next_entry().unwrap().unwrap();
        assert!(old.entry.mtime.is_none());
    }

    #[test]
    fn corrupt_header_is_format_error() {
        let mut data = build(|b| {
            let mut file = header(EntryType::Regular, 1, 0o644);
            b.append_data(&mut file, "x", &b"x"[..]).unwrap();
        });
        // checksum field
        data[148..156].copy_from_slice(b"0000000\0");

        let mut archive = TarArchive::new(&data[..]);
        let mut source = archive.entries().unwrap();
        let err = source.next_entry().unwrap().err().unwrap();
        assert!(matches!(err, Error::Format { layer: Layer::Tar, .. }), "{err:?}");
    }
}
