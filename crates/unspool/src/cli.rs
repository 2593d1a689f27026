use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use unspool_archive::{Destination, Output, Unpacker};
use unspool_fetch::Fetcher;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "unspool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Download a file, optionally unpacking it",
    long_about = None
)]
pub struct App {
    /// Remove compression layers and extract tar or zip archives
    #[arg(short, long)]
    pub unpack: bool,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// URL to download
    pub url: String,

    /// `-` for standard output, a directory (existing, or ending in a path
    /// separator), or a file path
    pub target: String,
}

/// Log filter for `-v` count; `RUST_LOG` overrides it.
pub fn log_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,unspool={level},unspool_archive={level},unspool_fetch={level}")
}

/// Logs go to stderr; stdout may be carrying the download.
pub fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run(app: &App) -> anyhow::Result<()> {
    let destination = Destination::resolve(&app.target);
    debug!(?destination, "resolved target");

    let fetcher = Fetcher::with_reqwest().context("could not set up http client")?;
    let download = fetcher
        .fetch(&app.url)
        .with_context(|| format!("could not fetch {}", app.url))?;

    let name = if destination.is_dir() {
        download.infer_name()
    } else {
        None
    };
    debug!(?name, "inferred output name");

    let mut unpacker = Unpacker::new(destination);
    if let Some(name) = name {
        unpacker = unpacker.name(name);
    }

    let report = if app.unpack {
        unpacker.unpack(download.body)?
    } else {
        unpacker.write(download.body)?
    };

    match &report.output {
        Output::File { path: Some(path), bytes } => {
            info!(bytes, layers = report.layers.len(), "saved {}", path.display());
        }
        Output::File { path: None, bytes } => {
            info!(bytes, layers = report.layers.len(), "written to stdout");
        }
        Output::Archive(archive) => {
            info!(
                entries = archive.entry_count,
                bytes = archive.total_bytes,
                "extracted {:?} archive",
                archive.format
            );
        }
    }
    Ok(())
}
