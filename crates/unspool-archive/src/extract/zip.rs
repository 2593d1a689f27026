use std::io::{self, BufRead, Read};

use chrono::NaiveDateTime;
use filetime::FileTime;
use flate2::Crc;
use flate2::bufread::DeflateDecoder;
use tracing::trace;

use crate::entry::{ArchiveEntry, EntryKind};
use crate::error::{Error, Layer, Result};
use crate::extract::{EntrySource, PendingEntry};
use crate::format::{ArchiveFormat, Peeker};

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

const DOS_FILE_MODE: u32 = 0o666;
const DOS_DIR_MODE: u32 = 0o777;

const LOCAL_HEADER_SIG: &[u8] = b"PK\x03\x04";
const DESCRIPTOR_SIG: &[u8] = b"PK\x07\x08";
const LOCAL_HEADER_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 1;
const FLAG_DESCRIPTOR: u16 = 1 << 3;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const ZIP64_EXTRA: u16 = 0x0001;

/// Zip members read from their local headers, front to back.
///
/// The central directory is never consulted, so the reader does not need
/// `Seek` and can be a network body or a decompression pipe.
///
/// Members whose sizes are in the local header go through the `zip` crate.
/// Members written by streaming tools carry their sizes in a trailing data
/// descriptor instead; stored and deflated ones are read here, deflate up
/// to the end of its stream and stored up to the first descriptor that
/// agrees with the bytes before it.
pub struct ZipSource<R: Read> {
    reader: Peeker<R>,
}

impl<R: Read> ZipSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Peeker::new(reader),
        }
    }

    fn has_trailing_descriptor(&mut self) -> io::Result<bool> {
        let header = self.reader.peek(LOCAL_HEADER_LEN)?;
        Ok(header.len() == LOCAL_HEADER_LEN
            && header.starts_with(LOCAL_HEADER_SIG)
            && le16(header, 6) & FLAG_DESCRIPTOR != 0)
    }

    fn sized_entry(&mut self) -> Option<Result<PendingEntry<ZipMember<'_, R>>>> {
        let file = match zip::read::read_zipfile_from_stream(&mut self.reader) {
            Ok(Some(file)) => file,
            Ok(None) => return None,
            Err(e) => return Some(Err(Error::from_read(Layer::Zip, io::Error::from(e)))),
        };

        let (kind, mode) = kind_and_mode(file.unix_mode(), file.is_dir());
        let mtime = file.last_modified().and_then(unix_mtime);
        let size = match kind {
            EntryKind::File => file.size(),
            _ => 0,
        };

        let entry = ArchiveEntry::new(file.name(), kind, mode, size).with_mtime(mtime);
        Some(Ok(PendingEntry {
            entry,
            reader: ZipMember::Sized(file),
        }))
    }

    fn streamed_entry(&mut self) -> Result<PendingEntry<ZipMember<'_, R>>> {
        let header =
            LocalHeader::read(&mut self.reader).map_err(|e| Error::from_read(Layer::Zip, e))?;
        trace!(name = %header.name, method = header.method, "member with data descriptor");

        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(zip_error(format!("{}: encrypted members are not supported", header.name)));
        }
        let body = match header.method {
            METHOD_STORED => Body::Stored(&mut self.reader),
            METHOD_DEFLATED => Body::Deflated(DeflateDecoder::new(&mut self.reader)),
            other => {
                return Err(zip_error(format!(
                    "{}: unsupported compression method {other}",
                    header.name
                )));
            }
        };

        let (kind, mode) = kind_and_mode(None, header.name.ends_with('/'));
        let mtime = zip::DateTime::try_from_msdos(header.date, header.time)
            .ok()
            .and_then(unix_mtime);
        // sizes are unknown until the descriptor; the member reader checks them
        let entry = ArchiveEntry::new(header.name.as_str(), kind, mode, 0).with_mtime(mtime);

        Ok(PendingEntry {
            entry,
            reader: ZipMember::Streamed(StreamedMember {
                body,
                crc: Crc::new(),
                written: 0,
                zip64: header.zip64,
                done: false,
            }),
        })
    }
}

fn kind_and_mode(unix_mode: Option<u32>, is_dir: bool) -> (EntryKind, u32) {
    let fallback = if is_dir {
        (EntryKind::Directory, DOS_DIR_MODE)
    } else {
        (EntryKind::File, DOS_FILE_MODE)
    };
    let Some(mode) = unix_mode else {
        return fallback;
    };

    let kind = match mode & S_IFMT {
        0 => fallback.0,
        S_IFREG => EntryKind::File,
        S_IFDIR => EntryKind::Directory,
        S_IFLNK => EntryKind::Symlink,
        other => EntryKind::Unsupported(format!("unix file type {:o}", other >> 12)),
    };
    (kind, mode & 0o7777)
}

/// DOS timestamps carry no zone; they are read as UTC.
fn unix_mtime(dt: zip::DateTime) -> Option<FileTime> {
    let naive = NaiveDateTime::try_from(dt).ok()?;
    Some(FileTime::from_unix_time(naive.and_utc().timestamp(), 0))
}

fn zip_error(message: String) -> Error {
    Error::Format {
        layer: Layer::Zip,
        source: io::Error::new(io::ErrorKind::InvalidData, message),
    }
}

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

struct LocalHeader {
    flags: u16,
    method: u16,
    time: u16,
    date: u16,
    name: String,
    zip64: bool,
}

impl LocalHeader {
    fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut fixed = [0u8; LOCAL_HEADER_LEN];
        reader.read_exact(&mut fixed)?;

        let mut name = vec![0u8; usize::from(le16(&fixed, 26))];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; usize::from(le16(&fixed, 28))];
        reader.read_exact(&mut extra)?;

        Ok(Self {
            flags: le16(&fixed, 6),
            method: le16(&fixed, 8),
            time: le16(&fixed, 10),
            date: le16(&fixed, 12),
            // names outside UTF-8 are CP437; non-ASCII bytes are replaced
            name: String::from_utf8_lossy(&name).into_owned(),
            zip64: has_extra_field(&extra, ZIP64_EXTRA),
        })
    }
}

fn has_extra_field(mut extra: &[u8], id: u16) -> bool {
    while extra.len() >= 4 {
        if le16(extra, 0) == id {
            return true;
        }
        let len = usize::from(le16(extra, 2));
        extra = extra.get(4 + len..).unwrap_or_default();
    }
    false
}

/// Length of a data descriptor including its signature.
fn descriptor_len(zip64: bool) -> usize {
    if zip64 { 24 } else { 16 }
}

/// Sizes in a 32-bit descriptor are the low bits of the real ones.
fn size_matches(recorded: u64, actual: u64, zip64: bool) -> bool {
    if zip64 {
        recorded == actual
    } else {
        recorded == actual & 0xffff_ffff
    }
}

struct Descriptor {
    crc: u32,
    compressed: u64,
    uncompressed: u64,
}

impl Descriptor {
    /// Parse a descriptor that starts with its signature.
    fn parse(raw: &[u8], zip64: bool) -> Self {
        let (compressed, uncompressed) = if zip64 {
            (le64(raw, 8), le64(raw, 16))
        } else {
            (u64::from(le32(raw, 8)), u64::from(le32(raw, 12)))
        };
        Self {
            crc: le32(raw, 4),
            compressed,
            uncompressed,
        }
    }

    /// Read a descriptor whose signature may be missing.
    fn read<R: Read>(reader: &mut Peeker<R>, zip64: bool) -> io::Result<Self> {
        let len = descriptor_len(zip64);
        let mut raw = vec![0u8; len];
        if reader.peek(DESCRIPTOR_SIG.len())? == DESCRIPTOR_SIG {
            reader.read_exact(&mut raw)?;
        } else {
            raw[..4].copy_from_slice(DESCRIPTOR_SIG);
            reader.read_exact(&mut raw[4..])?;
        }
        Ok(Self::parse(&raw, zip64))
    }
}

/// Content stream of one zip member.
pub enum ZipMember<'a, R: Read> {
    /// Sizes known up front.
    Sized(zip::read::ZipFile<'a, Peeker<R>>),
    /// Sizes in a trailing data descriptor.
    Streamed(StreamedMember<'a, R>),
}

impl<R: Read> Read for ZipMember<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ZipMember::Sized(file) => file.read(buf),
            ZipMember::Streamed(member) => member.read(buf),
        }
    }
}

enum Body<'a, R: Read> {
    Stored(&'a mut Peeker<R>),
    Deflated(DeflateDecoder<&'a mut Peeker<R>>),
}

/// A member followed by a data descriptor.
///
/// The descriptor is read and checked against the CRC and sizes of the
/// content once the body ends. Dropping the member drains it so the
/// stream is left at the next header.
pub struct StreamedMember<'a, R: Read> {
    body: Body<'a, R>,
    crc: Crc,
    written: u64,
    zip64: bool,
    done: bool,
}

impl<R: Read> StreamedMember<'_, R> {
    fn finish(&mut self) -> io::Result<()> {
        let (reader, compressed) = match &mut self.body {
            Body::Stored(reader) => (&mut **reader, self.written),
            Body::Deflated(decoder) => {
                let total_in = decoder.total_in();
                (&mut **decoder.get_mut(), total_in)
            }
        };

        let descriptor = Descriptor::read(reader, self.zip64)?;
        if descriptor.crc != self.crc.sum() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "member content does not match its CRC",
            ));
        }
        if !size_matches(descriptor.compressed, compressed, self.zip64)
            || !size_matches(descriptor.uncompressed, self.written, self.zip64)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "member length does not match its data descriptor",
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for StreamedMember<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        let n = match &mut self.body {
            Body::Deflated(decoder) => decoder.read(buf)?,
            Body::Stored(reader) => read_stored(reader, buf, &self.crc, self.written, self.zip64)?,
        };
        if n == 0 {
            self.done = true;
            return self.finish().map(|()| 0);
        }

        self.crc.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }
}

impl<R: Read> Drop for StreamedMember<'_, R> {
    fn drop(&mut self) {
        if !self.done {
            let _ = io::copy(self, &mut io::sink());
        }
    }
}

/// Copy stored bytes that cannot be the start of this member's descriptor.
///
/// Returns 0 once the descriptor is next in the stream.
fn read_stored<R: Read>(
    reader: &mut Peeker<R>,
    buf: &mut [u8],
    crc: &Crc,
    written: u64,
    zip64: bool,
) -> io::Result<usize> {
    let len = descriptor_len(zip64);
    let window = reader.peek(buf.len() + len)?;
    let limit = buf.len().min(window.len().saturating_sub(len));

    let found = if window.len() < len {
        None
    } else {
        (0..=limit).find(|&at| descriptor_at(window, at, crc, written, zip64))
    };
    let n = match found {
        Some(at) => at,
        None if limit > 0 => limit,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stored member ends without a data descriptor",
            ));
        }
    };

    buf[..n].copy_from_slice(&window[..n]);
    reader.consume(n);
    Ok(n)
}

/// Whether `window[at..]` holds a descriptor for `written` earlier bytes
/// plus `window[..at]`.
fn descriptor_at(window: &[u8], at: usize, crc: &Crc, written: u64, zip64: bool) -> bool {
    let raw = &window[at..];
    if !raw.starts_with(DESCRIPTOR_SIG) {
        return false;
    }
    let descriptor = Descriptor::parse(raw, zip64);
    let size = written + at as u64;
    if !size_matches(descriptor.compressed, size, zip64)
        || !size_matches(descriptor.uncompressed, size, zip64)
    {
        return false;
    }

    let mut tail = Crc::new();
    tail.update(&window[..at]);
    let mut whole = Crc::new();
    whole.combine(crc);
    whole.combine(&tail);
    whole.sum() == descriptor.crc
}

impl<R: Read> EntrySource for ZipSource<R> {
    type Reader<'a>
        = ZipMember<'a, R>
    where
        Self: 'a;

    fn next_entry(&mut self) -> Option<Result<PendingEntry<Self::Reader<'_>>>> {
        match self.has_trailing_descriptor() {
            Ok(true) => Some(self.streamed_entry()),
            Ok(false) => self.sized_entry(),
            Err(e) => Some(Err(Error::from_read(Layer::Zip, e))),
        }
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn build(f: impl FnOnce(&mut zip::ZipWriter<Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        f(&mut writer);
        writer.finish().unwrap().into_inner()
    }

    /// Written without seeking, so every member ends in a data descriptor.
    fn build_streamed(
        f: impl FnOnce(&mut zip::ZipWriter<zip::write::StreamWriter<Vec<u8>>>),
    ) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new_stream(Vec::new());
        f(&mut writer);
        writer.finish().unwrap().into_inner()
    }

    fn read_all<R: Read>(member: &mut PendingEntry<ZipMember<'_, R>>) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        member.reader.read_to_end(&mut content)?;
        Ok(content)
    }

    #[test]
    fn reads_members_without_seeking() {
        let data = build(|w| {
            let options = SimpleFileOptions::default().unix_permissions(0o755);
            w.add_directory("bin/", options).unwrap();
            w.start_file("bin/tool", options).unwrap();
            w.write_all(b"#!/bin/sh\n").unwrap();
            w.add_symlink("current", "bin/tool", options).unwrap();
        });

        // a plain slice: Read only
        let mut source = ZipSource::new(&data[..]);

        let dir = source.next_entry().unwrap().unwrap();
        assert_eq!(dir.entry.kind, EntryKind::Directory);
        assert_eq!(dir.entry.name.to_str(), Some("bin/"));
        drop(dir);

        let mut tool = source.next_entry().unwrap().unwrap();
        assert_eq!(tool.entry.kind, EntryKind::File);
        assert_eq!(tool.entry.mode, 0o755);
        assert_eq!(tool.entry.size, 10);
        assert_eq!(read_all(&mut tool).unwrap(), b"#!/bin/sh\n");
        drop(tool);

        let mut link = source.next_entry().unwrap().unwrap();
        assert_eq!(link.entry.kind, EntryKind::Symlink);
        assert_eq!(read_all(&mut link).unwrap(), b"bin/tool");
        drop(link);

        assert!(source.next_entry().is_none());
    }

    #[test]
    fn unread_member_is_skipped() {
        let data = build(|w| {
            let options = SimpleFileOptions::default();
            w.start_file("first", options).unwrap();
            w.write_all(&[7u8; 4096]).unwrap();
            w.start_file("second", options).unwrap();
            w.write_all(b"ok").unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        drop(source.next_entry().unwrap().unwrap());
        let mut second = source.next_entry().unwrap().unwrap();
        assert_eq!(second.entry.name.to_str(), Some("second"));
        assert_eq!(read_all(&mut second).unwrap(), b"ok");
    }

    #[test]
    fn deflated_members_with_descriptors_are_read() {
        let text = "streamed zip content\n".repeat(300);
        let data = build_streamed(|w| {
            let options = SimpleFileOptions::default();
            w.start_file("a.txt", options).unwrap();
            w.write_all(text.as_bytes()).unwrap();
            w.start_file("b.txt", options).unwrap();
            w.write_all(b"second").unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        let mut first = source.next_entry().unwrap().unwrap();
        assert_eq!(first.entry.name.to_str(), Some("a.txt"));
        assert_eq!(first.entry.kind, EntryKind::File);
        assert_eq!(first.entry.mode, 0o666);
        assert_eq!(read_all(&mut first).unwrap(), text.as_bytes());
        drop(first);

        let mut second = source.next_entry().unwrap().unwrap();
        assert_eq!(second.entry.name.to_str(), Some("b.txt"));
        assert_eq!(read_all(&mut second).unwrap(), b"second");
        drop(second);

        assert!(source.next_entry().is_none());
    }

    #[test]
    fn stored_members_with_descriptors_are_read() {
        // content that itself contains a descriptor signature
        let mut content = b"before PK\x07\x08 after ".repeat(50);
        content.extend_from_slice(&[0u8; 40]);
        let data = build_streamed(|w| {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            w.add_directory("dir/", options).unwrap();
            w.start_file("dir/raw.bin", options).unwrap();
            w.write_all(&content).unwrap();
            w.start_file("empty", options).unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        let dir = source.next_entry().unwrap().unwrap();
        assert_eq!(dir.entry.kind, EntryKind::Directory);
        drop(dir);

        let mut raw = source.next_entry().unwrap().unwrap();
        assert_eq!(raw.entry.name.to_str(), Some("dir/raw.bin"));
        assert_eq!(read_all(&mut raw).unwrap(), content);
        drop(raw);

        let mut empty = source.next_entry().unwrap().unwrap();
        assert!(read_all(&mut empty).unwrap().is_empty());
        drop(empty);

        assert!(source.next_entry().is_none());
    }

    #[test]
    fn unread_streamed_member_is_skipped() {
        let data = build_streamed(|w| {
            let options = SimpleFileOptions::default();
            w.start_file("skipped", options).unwrap();
            w.write_all(&[1u8; 10_000]).unwrap();
            w.start_file("kept", options).unwrap();
            w.write_all(b"kept").unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        drop(source.next_entry().unwrap().unwrap());
        let mut kept = source.next_entry().unwrap().unwrap();
        assert_eq!(kept.entry.name.to_str(), Some("kept"));
        assert_eq!(read_all(&mut kept).unwrap(), b"kept");
    }

    #[test]
    fn corrupted_stored_member_never_finds_its_descriptor() {
        let data = build_streamed(|w| {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            w.start_file("data", options).unwrap();
            w.write_all(b"payload").unwrap();
        });
        let mut data = data;
        let at = data.windows(7).position(|w| w == b"payload").unwrap();
        data[at] = b'P';

        let mut source = ZipSource::new(&data[..]);
        let mut member = source.next_entry().unwrap().unwrap();
        let err = read_all(&mut member).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn streamed_timestamp_is_utc() {
        let stamp = zip::DateTime::from_date_and_time(2024, 1, 2, 3, 4, 6).unwrap();
        let data = build_streamed(|w| {
            let options = SimpleFileOptions::default().last_modified_time(stamp);
            w.start_file("stamped", options).unwrap();
            w.write_all(b"t").unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        let entry = source.next_entry().unwrap().unwrap().entry;
        assert_eq!(entry.mtime, Some(FileTime::from_unix_time(1_704_164_646, 0)));
    }

    #[test]
    fn dos_timestamp_is_utc() {
        let stamp = zip::DateTime::from_date_and_time(2024, 1, 2, 3, 4, 6).unwrap();
        let data = build(|w| {
            let options = SimpleFileOptions::default().last_modified_time(stamp);
            w.start_file("stamped", options).unwrap();
            w.write_all(b"t").unwrap();
        });

        let mut source = ZipSource::new(&data[..]);
        let entry = source.next_entry().unwrap().unwrap().entry;
        assert_eq!(entry.mtime, Some(FileTime::from_unix_time(1_704_164_646, 0)));
    }

    #[test]
    fn epoch_conversion() {
        let dt = zip::DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(unix_mtime(dt), Some(FileTime::from_unix_time(315_532_800, 0)));
        let dt = zip::DateTime::from_date_and_time(2000, 2, 29, 12, 0, 0).unwrap();
        assert_eq!(unix_mtime(dt), Some(FileTime::from_unix_time(951_825_600, 0)));
    }

    #[test]
    fn modes_default_without_unix_bits() {
        assert_eq!(kind_and_mode(None, false), (EntryKind::File, 0o666));
        assert_eq!(kind_and_mode(None, true), (EntryKind::Directory, 0o777));
        assert_eq!(kind_and_mode(Some(0o644), false), (EntryKind::File, 0o644));
        assert_eq!(kind_and_mode(Some(0o100600), false), (EntryKind::File, 0o600));
        assert_eq!(kind_and_mode(Some(0o120777), false), (EntryKind::Symlink, 0o777));
        assert!(matches!(
            kind_and_mode(Some(0o010644), false).0,
            EntryKind::Unsupported(_)
        ));
    }

    #[test]
    fn extra_fields_are_walked() {
        let extra = [0x0a, 0x00, 0x02, 0x00, 0xff, 0xff, 0x01, 0x00, 0x00, 0x00];
        assert!(has_extra_field(&extra, ZIP64_EXTRA));
        assert!(!has_extra_field(&extra[..6], ZIP64_EXTRA));
        assert!(!has_extra_field(&[0x01], ZIP64_EXTRA));
    }

    #[test]
    fn garbage_after_magic_is_format_error() {
        let mut data = b"PK\x03\x04".to_vec();
        data.extend_from_slice(&[0xff; 8]);

        let mut source = ZipSource::new(&data[..]);
        let err = source.next_entry().unwrap().err().unwrap();
        assert!(matches!(err, Error::Format { layer: Layer::Zip, .. }), "{err:?}");
    }
}
