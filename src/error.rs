use reqwest::StatusCode;
use thiserror::Error;

/// A failed attempt to deliver a request body to the completions server.
///
/// Network and status failures are transient: the model worker retries the
/// same request after its backoff delay. A request that cannot be serialized
/// never will be, so it is not retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    // Non-2xx responses are failures too, so they get retried like any other
    #[error("server responded with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("could not serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Serialize(_))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("the other end of the hand-off channel is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
