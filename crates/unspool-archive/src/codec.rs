use std::fmt;
use std::io::{self, Read};

use crate::error::{self, Layer, Result};
use crate::format::Format;

/// Single-layer compression codecs peeled off by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Bzip2,
    #[cfg(feature = "xz")]
    Xz,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Codec {
    pub fn from_format(format: Format) -> Option<Self> {
        match format {
            Format::Gzip => Some(Self::Gzip),
            Format::Bzip2 => Some(Self::Bzip2),
            #[cfg(feature = "xz")]
            Format::Xz => Some(Self::Xz),
            #[cfg(feature = "zstd")]
            Format::Zstd => Some(Self::Zstd),
            Format::Zip | Format::Tar | Format::Opaque => None,
        }
    }

    /// File name suffix conventionally added by this codec.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            #[cfg(feature = "xz")]
            Self::Xz => ".xz",
            #[cfg(feature = "zstd")]
            Self::Zstd => ".zst",
        }
    }

    pub fn layer(self) -> Layer {
        match self {
            Self::Gzip => Layer::Gzip,
            Self::Bzip2 => Layer::Bzip2,
            #[cfg(feature = "xz")]
            Self::Xz => Layer::Xz,
            #[cfg(feature = "zstd")]
            Self::Zstd => Layer::Zstd,
        }
    }

    /// Wrap `reader` in this codec's decoder.
    ///
    /// Also returns the file name embedded in the stream header, when the
    /// format carries one (gzip only).
    pub fn decoder<'r, R: Read + 'r>(
        self,
        reader: R,
    ) -> Result<(Box<dyn Read + 'r>, Option<String>)> {
        match self {
            Self::Gzip => {
                let decoder = flate2::read::MultiGzDecoder::new(reader);
                let embedded = decoder
                    .header()
                    .and_then(|header| header.filename())
                    .filter(|name| !name.is_empty())
                    .map(|name| String::from_utf8_lossy(name).into_owned());
                Ok((Box::new(Tagged::new(decoder, Layer::Gzip)), embedded))
            }
            Self::Bzip2 => {
                let decoder = bzip2::read::MultiBzDecoder::new(reader);
                Ok((Box::new(Tagged::new(decoder, Layer::Bzip2)), None))
            }
            #[cfg(feature = "xz")]
            Self::Xz => {
                let decoder = xz2::read::XzDecoder::new_multi_decoder(reader);
                Ok((Box::new(Tagged::new(decoder, Layer::Xz)), None))
            }
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let decoder = zstd::stream::read::Decoder::new(reader).map_err(|e| {
                    error::Error::Format {
                        layer: Layer::Zstd,
                        source: e,
                    }
                })?;
                Ok((Box::new(Tagged::new(decoder, Layer::Zstd)), None))
            }
        }
    }

    /// Update the inferred output name after peeling this layer.
    ///
    /// A non-empty name embedded in the stream header replaces the current
    /// name; otherwise the codec's suffix is stripped.
    pub fn rename(self, name: &mut Option<String>, embedded: Option<String>) {
        if let Some(embedded) = embedded {
            *name = Some(embedded);
            return;
        }
        if let Some(current) = name.as_mut()
            && let Some(keep) = current.strip_suffix(self.suffix()).map(str::len)
        {
            current.truncate(keep);
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.layer(), f)
    }
}

/// Reader adapter that labels its I/O errors with a pipeline layer.
pub(crate) struct Tagged<R> {
    inner: R,
    layer: Layer,
}

impl<R> Tagged<R> {
    pub(crate) fn new(inner: R, layer: Layer) -> Self {
        Self { inner, layer }
    }
}

impl<R: Read> Read for Tagged<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| error::tag(self.layer, e))
    }
}
