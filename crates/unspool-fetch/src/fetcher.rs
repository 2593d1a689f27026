use std::io::Read;

use tracing::{debug, info};
use url::Url;

use crate::client::HttpClient;
use crate::error::{FetchError, Result};
use crate::name;

const HTTP_OK: u16 = 200;

/// A successful response, ready to be streamed.
pub struct Download {
    pub body: Box<dyn Read + Send>,
    pub source_url: String,
    pub final_url: String,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
}

impl Download {
    /// File name suggested by the response; see [`name::infer_name`].
    pub fn infer_name(&self) -> Option<String> {
        name::infer_name(
            self.content_disposition.as_deref(),
            &self.final_url,
            &self.source_url,
        )
    }
}

pub struct Fetcher<C: HttpClient> {
    client: C,
}

impl<C: HttpClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// GET `url`. Anything but `200 OK` is an error.
    pub fn fetch(&self, url: &str) -> Result<Download> {
        Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        debug!(url, "sending request");
        let response = self
            .client
            .get(url)
            .map_err(|e| FetchError::Request(Box::new(e)))?;

        if response.status != HTTP_OK {
            return Err(FetchError::Status {
                status: response.status,
                reason: response.reason,
            });
        }

        info!(
            url,
            final_url = %response.final_url,
            length = ?response.content_length,
            "response received"
        );
        Ok(Download {
            body: response.body,
            source_url: url.to_owned(),
            final_url: response.final_url,
            content_disposition: response.content_disposition,
            content_length: response.content_length,
        })
    }
}

#[cfg(feature = "reqwest")]
impl Fetcher<crate::ReqwestClient> {
    pub fn with_reqwest() -> Result<Self> {
        Ok(Self::new(crate::ReqwestClient::new()?))
    }
}
