use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::{decode, Transport};
use crate::error::TransportError;
use crate::handoff::{HandoffReceiver, HandoffSender};
use crate::params::GenerationParameters;

/// How long the worker waits before retrying a failed request.
///
/// `attempt` is the number of the attempt that just failed, starting at 1.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay after every failure, forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        FixedBackoff { delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        FixedBackoff::new(Duration::from_secs(1))
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

#[derive(Debug)]
enum WorkerState {
    WaitingForRequest,
    Sending {
        request: GenerationParameters,
        attempt: u32,
    },
    BackoffSleep {
        request: GenerationParameters,
        attempt: u32,
    },
    Cancelled,
}

/// `ModelWorker` is the only reader of the request channel and the only writer
/// of the reply channel.
///
/// It takes one request at a time and keeps resending it until the server
/// answers, then hands the first choice's text back. There is no attempt
/// limit: an unreachable server keeps the worker retrying until it is
/// cancelled. Cancellation is noticed while waiting for a request and after
/// each backoff sleep, never in the middle of a network call.
pub struct ModelWorker {
    transport: Arc<dyn Transport>,
    url: String,
    backoff: Box<dyn Backoff>,
    requests: HandoffReceiver<GenerationParameters>,
    replies: HandoffSender<String>,
    cancel: CancellationToken,
}

impl ModelWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        url: impl Into<String>,
        backoff: Box<dyn Backoff>,
        requests: HandoffReceiver<GenerationParameters>,
        replies: HandoffSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        ModelWorker {
            transport,
            url: url.into(),
            backoff,
            requests,
            replies,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut state = WorkerState::WaitingForRequest;
        loop {
            state = match state {
                WorkerState::WaitingForRequest => self.wait_for_request().await,
                WorkerState::Sending { request, attempt } => {
                    match self.send_once(&request).await {
                        Ok(text) => self.deliver(text).await,
                        // normalize() rules out unserializable values, so this is a bug
                        Err(e) if !e.is_retryable() => {
                            error!("giving up on request to {}: {}", self.url, e);
                            self.deliver(String::new()).await
                        }
                        Err(e) => {
                            warn!("attempt {} to reach {} failed: {}", attempt, self.url, e);
                            WorkerState::BackoffSleep { request, attempt }
                        }
                    }
                }
                WorkerState::BackoffSleep { request, attempt } => {
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    if self.cancel.is_cancelled() {
                        WorkerState::Cancelled
                    } else {
                        WorkerState::Sending {
                            request,
                            attempt: attempt + 1,
                        }
                    }
                }
                WorkerState::Cancelled => break,
            };
        }
        debug!("model worker stopped");
    }

    async fn wait_for_request(&mut self) -> WorkerState {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => WorkerState::Cancelled,
            request = self.requests.recv() => match request {
                Some(request) => WorkerState::Sending { request, attempt: 1 },
                None => WorkerState::Cancelled,
            },
        }
    }

    async fn send_once(&self, request: &GenerationParameters) -> Result<String, TransportError> {
        let body = serde_json::to_vec(&request.clone().normalized())?;
        let raw = self.transport.post(&self.url, body).await?;

        let response = decode(&raw);
        match response.first_text() {
            Some(text) => Ok(text.to_string()),
            None => {
                warn!("completion response from {} carried no choices", self.url);
                Ok(String::new())
            }
        }
    }

    async fn deliver(&mut self, text: String) -> WorkerState {
        match self.replies.send(text).await {
            Ok(()) => WorkerState::WaitingForRequest,
            Err(_) => {
                debug!("reply receiver is gone");
                WorkerState::Cancelled
            }
        }
    }
}
