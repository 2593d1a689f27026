use std::io::{self, Read, Write};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use tracing::{debug, info};

use crate::codec::{Codec, Tagged};
use crate::entry::ArchiveReport;
use crate::error::{Error, Layer, Result};
use crate::extract::{self, TarArchive, ZipSource};
use crate::format::{Format, Peeker, SNIFF_LEN, sniff};
use crate::sanitize::DestinationRoot;
use crate::write::{Sink, target_in_dir, write_stream};

/// Where the unpacked result is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    /// A single output file. Archives are extracted into this path as a
    /// directory.
    File(PathBuf),
    /// A directory; plain streams are written to `dir/<inferred name>`.
    Dir(PathBuf),
}

impl Destination {
    /// Interpret a command-line target.
    ///
    /// `-` is standard output. A trailing separator or an existing directory
    /// means a directory; anything else is a file path.
    pub fn resolve(target: &str) -> Self {
        if target == "-" {
            return Self::Stdout;
        }
        let path = PathBuf::from(target);
        if target.ends_with('/') || target.ends_with(MAIN_SEPARATOR) || path.is_dir() {
            Self::Dir(path)
        } else {
            Self::File(path)
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir(_))
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Self::Stdout => None,
            Self::File(path) | Self::Dir(path) => Some(path),
        }
    }
}

#[derive(Debug)]
pub enum Output {
    /// A plain stream; `path` is `None` for standard output.
    File { path: Option<PathBuf>, bytes: u64 },
    Archive(ArchiveReport),
}

#[derive(Debug)]
pub struct UnpackReport {
    /// Compression layers removed, outermost first.
    pub layers: Vec<Codec>,
    pub output: Output,
}

/// Peels compression layers off a stream and writes what is left.
///
/// ```no_run
/// use unspool_archive::{Destination, Unpacker};
///
/// let body = std::fs::File::open("release.tar.gz")?;
/// let report = Unpacker::new(Destination::Dir("out".into()))
///     .name("release.tar.gz")
///     .unpack(body)?;
/// println!("{} layers removed", report.layers.len());
/// # Ok::<(), unspool_archive::Error>(())
/// ```
pub struct Unpacker<'w> {
    destination: Destination,
    name: Option<String>,
    stdout: Option<Box<dyn Write + 'w>>,
}

impl<'w> Unpacker<'w> {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            name: None,
            stdout: None,
        }
    }

    /// Seed the inferred output name, e.g. from HTTP metadata.
    pub fn name(mut self, hint: impl Into<String>) -> Self {
        self.name = Some(hint.into());
        self
    }

    /// Send standard-output results to `writer` instead of the process stdout.
    pub fn stdout(mut self, writer: impl Write + 'w) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// The output name as adjusted by the layers removed so far.
    pub fn inferred_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Sniff and unwrap `reader` until it is an archive or an opaque stream.
    ///
    /// Each compression layer replaces the stream with its decoded form and
    /// the loop sniffs again. Archives are extracted into the destination,
    /// anything else is written through unchanged.
    pub fn unpack<'r, R: Read + 'r>(&mut self, reader: R) -> Result<UnpackReport> {
        let to_stdout = self.destination.is_stdout();
        let mut layers = Vec::new();
        let mut layer = Layer::Source;
        let mut stream: Box<dyn Read + 'r> = Box::new(Tagged::new(reader, Layer::Source));

        loop {
            let mut peeker = Peeker::new(stream);
            let prefix = peeker
                .peek(SNIFF_LEN)
                .map_err(|e| Error::from_read(layer, e))?;
            let format = sniff(prefix, to_stdout);
            debug!(?format, depth = layers.len(), "sniffed stream");

            if let Some(codec) = Codec::from_format(format) {
                let (decoder, embedded) = codec.decoder(peeker)?;
                codec.rename(&mut self.name, embedded);
                debug!(%codec, name = ?self.name, "removing compression layer");
                layers.push(codec);
                layer = codec.layer();
                stream = decoder;
                continue;
            }

            let output = match format {
                Format::Tar => {
                    let root = self.archive_root()?;
                    let mut archive = TarArchive::new(peeker);
                    let mut source = archive.entries()?;
                    Output::Archive(extract::extract(&mut source, &root)?)
                }
                Format::Zip => {
                    let root = self.archive_root()?;
                    let mut source = ZipSource::new(peeker);
                    Output::Archive(extract::extract(&mut source, &root)?)
                }
                _ => self.write_plain(&mut peeker, layer)?,
            };
            log_output(&layers, &output);
            return Ok(UnpackReport { layers, output });
        }
    }

    /// Write `reader` to the destination without looking at its contents.
    pub fn write<R: Read>(&mut self, reader: R) -> Result<UnpackReport> {
        let mut reader = Tagged::new(reader, Layer::Source);
        let output = self.write_plain(&mut reader, Layer::Source)?;
        log_output(&[], &output);
        Ok(UnpackReport {
            layers: Vec::new(),
            output,
        })
    }

    fn archive_root(&self) -> Result<DestinationRoot> {
        let dir = self.destination.path().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "archives cannot be extracted to standard output",
            ))
        })?;
        let root = DestinationRoot::prepare(dir)?;
        debug!(root = %root.path().display(), "extracting archive");
        Ok(root)
    }

    fn write_plain<R: Read>(&mut self, reader: &mut R, layer: Layer) -> Result<Output> {
        let path = match &self.destination {
            Destination::Stdout => None,
            Destination::File(path) => Some(path.clone()),
            Destination::Dir(dir) => Some(target_in_dir(dir, self.name.as_deref())?),
        };

        let bytes = match &path {
            Some(path) => write_stream(reader, Sink::create(path)?, layer)?,
            None => match self.stdout.as_mut() {
                Some(out) => write_stream(reader, Sink::Stdout(out), layer)?,
                None => {
                    let mut out = io::stdout().lock();
                    write_stream(reader, Sink::Stdout(&mut out), layer)?
                }
            },
        };
        Ok(Output::File { path, bytes })
    }
}

fn log_output(layers: &[Codec], output: &Output) {
    match output {
        Output::File { path: Some(path), bytes } => {
            info!(layers = layers.len(), bytes, path = %path.display(), "wrote file");
        }
        Output::File { path: None, bytes } => {
            info!(layers = layers.len(), bytes, "wrote standard output");
        }
        Output::Archive(report) => {
            info!(
                layers = layers.len(),
                format = ?report.format,
                entries = report.entry_count,
                bytes = report.total_bytes,
                "extracted archive"
            );
        }
    }
}
