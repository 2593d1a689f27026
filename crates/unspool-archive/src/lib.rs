//! Streaming decompression and archive extraction.
//!
//! A stream is sniffed, stripped of compression layers one at a time and
//! then either extracted (tar, zip) or written through unchanged.
//!
//! # Architecture
//!
//! - `format.rs` - Prefix sniffing and look-ahead reader
//! - `codec.rs` - Compression layers and output name inference
//! - `pipeline.rs` - The sniff/unwrap loop and destinations
//! - `extract/` - Entry sources per archive format, secure extraction
//! - `sanitize.rs` - Path containment (zip-slip prevention)
//! - `write.rs` - Plain stream output

pub use codec::Codec;
pub use entry::{ArchiveEntry, ArchiveReport, EntryKind, ExtractedEntry};
pub use error::{Error, Layer, Result};
pub use extract::{EntrySource, PendingEntry, extract};
pub use format::{ArchiveFormat, Format, Peeker, SNIFF_LEN, sniff};
pub use pipeline::{Destination, Output, UnpackReport, Unpacker};
pub use sanitize::{DestinationRoot, validate_file_name};

mod codec;
pub mod entry;
mod error;
pub mod extract;
mod format;
mod pipeline;
mod sanitize;
mod write;
