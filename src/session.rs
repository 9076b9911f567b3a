use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::ChatTemplate;
use crate::error::PipelineError;
use crate::params::{ChatMessage, GenerationParameters};
use crate::pipeline::Pipeline;

pub const EXIT_COMMAND: &str = "exit";
const USER_PROMPT: &str = "User: ";
const MODEL_PREFIX: &str = "Model: ";

/// How each line the user types is turned into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Wrapped in the chat template and sent as `prompt`.
    Templated,
    /// Sent as-is in a one-message `messages` list; the server applies its own template.
    Chat,
}

/// The interactive side of the conversation.
///
/// Reads a line, sends it through the pipeline, prints the reply, and
/// repeats until the user types `exit` or the input ends.
pub struct Session {
    template: ChatTemplate,
    params: GenerationParameters,
    mode: InputMode,
    pipeline: Pipeline,
}

impl Session {
    pub fn new(
        template: ChatTemplate,
        params: GenerationParameters,
        mode: InputMode,
        pipeline: Pipeline,
    ) -> Self {
        Session {
            template,
            params,
            mode,
            pipeline,
        }
    }

    fn build_request(&self, text: &str) -> GenerationParameters {
        match self.mode {
            InputMode::Templated => self.params.with_prompt(self.template.format(text)),
            InputMode::Chat => self.params.with_messages(vec![ChatMessage::user(text)]),
        }
    }

    /// Runs the conversation to completion, then shuts the pipeline down.
    pub async fn run<R, W>(mut self, mut input: R, mut output: W) -> Result<(), PipelineError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.converse(&mut input, &mut output).await;
        self.pipeline.shutdown().await;
        result
    }

    async fn converse<R, W>(&mut self, input: &mut R, output: &mut W) -> Result<(), PipelineError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            output.write_all(USER_PROMPT.as_bytes()).await?;
            output.flush().await?;

            line.clear();
            if input.read_line(&mut line).await? == 0 {
                debug!("input closed");
                output.write_all(b"\n").await?;
                break;
            }
            let text = line.trim();
            if text == EXIT_COMMAND {
                info!("user ended the session");
                break;
            }

            let request = self.build_request(text);
            let reply = self.pipeline.request(request).await?;
            let reply = self.template.strip_turn_end(&reply);

            output
                .write_all(format!("{}{}\n", MODEL_PREFIX, reply).as_bytes())
                .await?;
        }
        output.flush().await?;
        Ok(())
    }
}
