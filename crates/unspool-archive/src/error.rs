use std::fmt;
use std::io;
use std::path::PathBuf;

/// The stage of the pipeline an error originated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Source,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Tar,
    Zip,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Source => "source",
            Layer::Gzip => "gzip",
            Layer::Bzip2 => "bzip2",
            Layer::Xz => "xz",
            Layer::Zstd => "zstd",
            Layer::Tar => "tar",
            Layer::Zip => "zip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("read failed: {0}")]
    Source(#[source] io::Error),

    #[error("{layer}: {source}")]
    Format {
        layer: Layer,
        #[source]
        source: io::Error,
    },

    #[error("wrote {written} bytes to {entry:?}; expected {expected}")]
    SizeMismatch {
        entry: PathBuf,
        written: u64,
        expected: u64,
    },

    #[error("illegal file path {entry:?}")]
    IllegalPath { entry: PathBuf },

    #[error("archive contained unsupported file {entry:?} of type {kind}")]
    UnsupportedEntry { entry: PathBuf, kind: String },

    #[error("no file name to write into directory '{dir}'")]
    MissingName { dir: PathBuf },

    #[error("error writing to {path:?}: {source}")]
    ExtractionFailed { path: PathBuf, source: io::Error },

    #[error("failed to create directory {path:?}: {source}")]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    #[error("failed to create symlink {link:?} -> {target:?}: {source}")]
    SymlinkCreationFailed {
        target: PathBuf,
        link: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An I/O error annotated with the layer whose reader raised it.
///
/// Travels inside an [`io::Error`] through the reader chain so that a gzip
/// failure observed by the tar reader is still reported as a gzip failure.
#[derive(Debug, thiserror::Error)]
#[error("{layer}: {source}")]
pub(crate) struct LayerError {
    layer: Layer,
    source: io::Error,
}

/// Attach `layer` to `err` unless an inner layer already claimed it.
pub(crate) fn tag(layer: Layer, err: io::Error) -> io::Error {
    if err.get_ref().is_some_and(|inner| inner.is::<LayerError>()) {
        return err;
    }
    let kind = err.kind();
    io::Error::new(kind, LayerError { layer, source: err })
}

/// Returns true when `err` carries a layer tag.
pub(crate) fn is_tagged(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<LayerError>())
}

impl Error {
    /// Classify an I/O error raised while reading through the pipeline.
    ///
    /// Untagged errors are attributed to `fallback`, the layer that was being
    /// driven when the error surfaced.
    pub(crate) fn from_read(fallback: Layer, err: io::Error) -> Self {
        let (layer, source) = if is_tagged(&err) {
            match err.into_inner().map(|inner| inner.downcast::<LayerError>()) {
                Some(Ok(tagged)) => (tagged.layer, tagged.source),
                Some(Err(other)) => (fallback, io::Error::other(other)),
                None => (fallback, io::Error::other("unknown read failure")),
            }
        } else {
            (fallback, err)
        };

        match layer {
            Layer::Source => Error::Source(source),
            layer => Error::Format { layer, source },
        }
    }

    /// Classify an error from copying an entry or stream into `path`.
    ///
    /// Every reader in the chain is tagged, so an untagged error came from
    /// the write side.
    pub(crate) fn from_copy(fallback: Layer, path: PathBuf, err: io::Error) -> Self {
        if is_tagged(&err) {
            Error::from_read(fallback, err)
        } else {
            Error::ExtractionFailed { path, source: err }
        }
    }
}
