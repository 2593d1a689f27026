use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Layer, Result};
use crate::sanitize::validate_file_name;

/// Where a plain (non-archive) stream ends up.
pub enum Sink<'a> {
    File { path: PathBuf, file: File },
    Stdout(&'a mut dyn Write),
}

impl Sink<'_> {
    /// Create or truncate `path`, making its parent directories first.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o666);
        }
        let file = options.open(path).map_err(|e| Error::ExtractionFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Sink::File {
            path: path.to_path_buf(),
            file,
        })
    }

    fn label(&self) -> PathBuf {
        match self {
            Sink::File { path, .. } => path.clone(),
            Sink::Stdout(_) => PathBuf::from("<stdout>"),
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::File { file, .. } => file,
            Sink::Stdout(out) => &mut **out,
        }
    }

    fn close(self) -> io::Result<()> {
        match self {
            Sink::File { mut file, .. } => {
                file.flush()?;
                file.sync_all()
            }
            Sink::Stdout(out) => out.flush(),
        }
    }
}

/// Path of the output file for a directory destination.
///
/// The inferred name must be a single component; there is nothing to fall
/// back on when no name could be inferred.
pub fn target_in_dir(dir: &Path, name: Option<&str>) -> Result<PathBuf> {
    let name = name.ok_or_else(|| Error::MissingName {
        dir: dir.to_path_buf(),
    })?;
    Ok(dir.join(validate_file_name(name)?))
}

/// Copy `reader` into `sink`, then close the sink.
///
/// A copy failure is reported in preference to a close failure. `layer` is
/// the innermost layer of the reader chain, used for untagged read errors.
pub fn write_stream<R: Read>(reader: &mut R, mut sink: Sink<'_>, layer: Layer) -> Result<u64> {
    let label = sink.label();
    let copied = io::copy(reader, sink.writer());
    let closed = sink.close();

    let written = copied.map_err(|e| Error::from_copy(layer, label.clone(), e))?;
    closed.map_err(|e| Error::ExtractionFailed {
        path: label,
        source: e,
    })?;
    Ok(written)
}
