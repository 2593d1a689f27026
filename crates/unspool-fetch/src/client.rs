use std::io::Read;

/// A response whose status line and headers have been read.
///
/// The body has not been consumed; it streams from the connection.
pub struct Response {
    pub status: u16,
    pub reason: String,
    /// URL of the last request after redirects.
    pub final_url: String,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Blocking HTTP client abstraction.
///
/// Implementations follow redirects themselves and report the final URL.
/// Status codes are not interpreted here; see [`crate::Fetcher`].
pub trait HttpClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(&self, url: &str) -> Result<Response, Self::Error>;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::time::Duration;

    use super::*;
    use crate::error::FetchError;

    /// Production HTTP client using reqwest's blocking API.
    pub struct ReqwestClient {
        client: reqwest::blocking::Client,
    }

    impl ReqwestClient {
        /// Client without an overall deadline; large bodies stream for as
        /// long as they take.
        pub fn new() -> crate::Result<Self> {
            let client = reqwest::blocking::Client::builder()
                .user_agent(concat!("unspool/", env!("CARGO_PKG_VERSION")))
                .timeout(None::<Duration>)
                .build()
                .map_err(|e| FetchError::Request(Box::new(e)))?;
            Ok(Self { client })
        }

        pub fn from_client(client: reqwest::blocking::Client) -> Self {
            Self { client }
        }
    }

    impl HttpClient for ReqwestClient {
        type Error = reqwest::Error;

        fn get(&self, url: &str) -> Result<Response, Self::Error> {
            let response = self.client.get(url).send()?;

            let status = response.status();
            let content_disposition = response
                .headers()
                .get(reqwest::header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            Ok(Response {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
                final_url: response.url().to_string(),
                content_disposition,
                content_length: response.content_length(),
                body: Box::new(response),
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
