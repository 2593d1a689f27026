//! Blocking HTTP downloads for streaming consumers.
//!
//! # Architecture
//!
//! - [`HttpClient`] - Transport abstraction, one `get` per download
//! - [`Fetcher`] - Status checking on top of a client
//! - [`name`] - Output file name inference from response metadata
//!
//! Bodies are handed back unread as [`std::io::Read`] streams; nothing is
//! buffered or written to disk here.

mod client;
mod error;
mod fetcher;
pub mod name;

pub use client::{HttpClient, Response};
pub use error::{FetchError, Result};
pub use fetcher::{Download, Fetcher};
pub use name::infer_name;

#[cfg(feature = "reqwest")]
pub use client::ReqwestClient;
