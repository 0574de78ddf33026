use crate::config::ValidationError;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors that can occur while relaying a submission
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid request body: {0}")]
    InvalidSubmission(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Malformed upstream response from {0}: {1}")]
    MalformedResponse(String, String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
