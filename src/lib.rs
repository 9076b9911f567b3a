//! An interactive chat client for a text-completion server.
//!
//! User turns are wrapped in a chat template and handed, one at a time, to a
//! background [`worker::ModelWorker`] that posts them to the server and keeps
//! retrying until it gets an answer.

pub mod api;
pub mod config;
pub mod error;
pub mod handoff;
pub mod params;
pub mod pipeline;
pub mod session;
pub mod worker;

pub use api::{decode, CompletionResponse, HttpTransport, Transport};
pub use config::{ChatTemplate, Config};
pub use error::{PipelineError, TransportError};
pub use params::{ChatMessage, GenerationParameters, PromptInput};
pub use pipeline::Pipeline;
pub use session::{InputMode, Session};
pub use worker::{Backoff, FixedBackoff, ModelWorker};
