use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::Transport;
use crate::error::PipelineError;
use crate::handoff::{handoff, HandoffReceiver, HandoffSender};
use crate::params::GenerationParameters;
use crate::worker::{Backoff, ModelWorker};

/// The session's side of a running [`ModelWorker`].
///
/// Requests and replies strictly alternate: there is no request id, so a
/// second [`Pipeline::submit`] waits until the reply to the first has been
/// taken with [`Pipeline::next_reply`].
pub struct Pipeline {
    requests: HandoffSender<GenerationParameters>,
    replies: HandoffReceiver<String>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl Pipeline {
    /// Starts a worker on the current tokio runtime that posts to `url`.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        url: impl Into<String>,
        backoff: Box<dyn Backoff>,
    ) -> Self {
        let (requests, request_rx) = handoff();
        let (reply_tx, replies) = handoff();
        let cancel = CancellationToken::new();

        let worker = ModelWorker::new(
            transport,
            url,
            backoff,
            request_rx,
            reply_tx,
            cancel.clone(),
        );
        let worker = tokio::spawn(worker.run());
        debug!("model worker started");

        Pipeline {
            requests,
            replies,
            cancel,
            worker,
        }
    }

    pub async fn submit(&mut self, request: GenerationParameters) -> Result<(), PipelineError> {
        self.requests.send(request).await
    }

    /// Waits for the reply to the last submitted request, however long the
    /// worker takes to get one.
    pub async fn next_reply(&mut self) -> Result<String, PipelineError> {
        self.replies.recv().await.ok_or(PipelineError::Closed)
    }

    pub async fn request(&mut self, request: GenerationParameters) -> Result<String, PipelineError> {
        self.submit(request).await?;
        self.next_reply().await
    }

    /// Cancels the worker and waits for it to exit.
    ///
    /// A worker stuck retrying notices after its current backoff delay; one
    /// blocked on a network call only after that call returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.requests);
        drop(self.replies);
        if let Err(e) = self.worker.await {
            warn!("model worker ended abnormally: {}", e);
        }
    }
}
