use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("http error: {status} {reason}")]
    Status { status: u16, reason: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;
