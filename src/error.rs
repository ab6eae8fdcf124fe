use std::time::Duration;
use thiserror::Error;

/// Message carried by a response-header timeout. The classifier also matches
/// on it when the timeout arrives wrapped in an opaque error.
pub const HEADER_TIMEOUT_MESSAGE: &str = "timeout awaiting response headers";

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("URI error: {0}")]
    Uri(String),
}

/// Failures of a single round trip to a backend. These never leave the
/// transport: each one is classified and replaced by a synthetic response.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{}", HEADER_TIMEOUT_MESSAGE)]
    HeaderTimeout(Duration),

    #[error(transparent)]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("could not build backend request: {0}")]
    Rewrite(String),

    #[error("declared content-length {declared} does not match body length {actual}")]
    ContentLengthMismatch { declared: u64, actual: u64 },
}
