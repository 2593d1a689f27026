use std::io::{self, BufRead, Read};

/// Bytes inspected by [`sniff`]; enough to reach the ustar magic at offset 257.
pub const SNIFF_LEN: usize = 264;

const GZIP_MAGIC: &[u8] = b"\x1f\x8b";
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_MAGIC: &[u8] = b"PK";
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;
#[cfg(feature = "xz")]
const XZ_MAGIC: &[u8] = b"\xfd7zXZ\x00";
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: &[u8] = b"\x28\xb5\x2f\xfd";

/// Classification of a stream prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Gzip,
    Bzip2,
    #[cfg(feature = "xz")]
    Xz,
    #[cfg(feature = "zstd")]
    Zstd,
    Zip,
    Tar,
    Opaque,
}

/// Archive container formats the extractor understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
}

/// Classify a stream from its leading bytes.
///
/// Archive formats are only recognized when the output is not standard
/// output: a single output stream has nowhere to put multiple members, so
/// archives are passed through untouched. Prefixes too short for a test
/// simply fail it.
pub fn sniff(prefix: &[u8], to_stdout: bool) -> Format {
    match prefix {
        p if p.starts_with(GZIP_MAGIC) => Format::Gzip,
        p if p.starts_with(BZIP2_MAGIC) => Format::Bzip2,
        #[cfg(feature = "xz")]
        p if p.starts_with(XZ_MAGIC) => Format::Xz,
        #[cfg(feature = "zstd")]
        p if p.starts_with(ZSTD_MAGIC) => Format::Zstd,
        p if !to_stdout && p.starts_with(ZIP_MAGIC) => Format::Zip,
        p if !to_stdout && is_tar_header(p) => Format::Tar,
        _ => Format::Opaque,
    }
}

fn is_tar_header(data: &[u8]) -> bool {
    data.get(TAR_MAGIC_OFFSET..)
        .is_some_and(|tail| tail.starts_with(TAR_MAGIC))
}

/// Forward-only reader that can look ahead without consuming.
///
/// Bytes returned by [`Peeker::peek`] are replayed by the `Read` and
/// `BufRead` impls before anything further is pulled from the inner reader.
/// It can peek again at any point, which the zip reader uses to look at each
/// local header before deciding how to read the member.
pub struct Peeker<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> Peeker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(SNIFF_LEN),
            pos: 0,
        }
    }

    /// Buffer up to `n` unread bytes and return them.
    ///
    /// Keeps reading through short reads; returns fewer than `n` bytes only
    /// at end of stream.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        while self.buf.len() < n {
            let filled = self.buf.len();
            self.buf.resize(n, 0);
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => {
                    self.buf.truncate(filled);
                    break;
                }
                Ok(read) => self.buf.truncate(filled + read),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buf.truncate(filled),
                Err(e) => {
                    self.buf.truncate(filled);
                    return Err(e);
                }
            }
        }
        Ok(&self.buf[..self.buf.len().min(n)])
    }
}

impl<R: Read> Read for Peeker<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(out)
    }
}

impl<R: Read> BufRead for Peeker<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            self.buf.clear();
            self.pos = 0;
            self.buf.resize(8 * 1024, 0);
            let n = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.buf.clear();
                        return Err(e);
                    }
                }
            };
            self.buf.truncate(n);
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}
