use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::TransportError;
use crate::params::ChatMessage;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CompletionResponse {
    pub id: String,

    // "text_completion" or "chat.completion"
    pub object: String,

    // Unix timestamp
    pub created: i64,

    pub model: String,

    pub choices: Vec<Choice>,

    // Passed through as-is; nothing here looks inside it
    pub usage: Value,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Choice {
    pub text: String,
    pub index: i64,
    pub logprobs: Value,
    pub finish_reason: Option<String>,

    // Only present on chat-completion bodies
    pub message: Option<ChatMessage>,
}

impl CompletionResponse {
    /// The generated text of the first choice, if the server sent any choices.
    ///
    /// Plain completions carry it in `text`; chat completions carry it in
    /// `message.content`, which is used when `text` is empty.
    pub fn first_text(&self) -> Option<&str> {
        let choice = self.choices.first()?;
        if choice.text.is_empty() {
            if let Some(message) = &choice.message {
                return Some(&message.content);
            }
        }
        Some(&choice.text)
    }
}

/// Decodes a completion response body without ever failing.
///
/// Each field is extracted on its own, inside every choice as well as at the
/// top level, so a field with the wrong shape falls back to its zero value
/// while the rest still decode. A body
/// that isn't a JSON object at all yields an empty response; callers must
/// check `choices` before indexing into it.
pub fn decode(body: &[u8]) -> CompletionResponse {
    let mut fields = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            debug!("completion body is not an object: {}", other);
            return CompletionResponse::default();
        }
        Err(e) => {
            debug!(
                "failed to parse completion body: {}\nRaw body: {}",
                e,
                String::from_utf8_lossy(body)
            );
            return CompletionResponse::default();
        }
    };

    CompletionResponse {
        id: take_field(&mut fields, "id"),
        object: take_field(&mut fields, "object"),
        created: take_field(&mut fields, "created"),
        model: take_field(&mut fields, "model"),
        choices: take_field::<Vec<Value>>(&mut fields, "choices")
            .into_iter()
            .map(decode_choice)
            .collect(),
        usage: fields.remove("usage").unwrap_or_default(),
    }
}

fn decode_choice(choice: Value) -> Choice {
    let mut fields = match choice {
        Value::Object(fields) => fields,
        other => {
            debug!("ignoring malformed choice: {}", other);
            return Choice::default();
        }
    };
    Choice {
        text: take_field(&mut fields, "text"),
        index: take_field(&mut fields, "index"),
        logprobs: fields.remove("logprobs").unwrap_or_default(),
        finish_reason: take_field(&mut fields, "finish_reason"),
        message: match fields.remove("message") {
            Some(Value::Object(mut message)) => Some(ChatMessage {
                role: take_field(&mut message, "role"),
                content: take_field(&mut message, "content"),
            }),
            _ => None,
        },
    }
}

fn take_field<T: DeserializeOwned + Default>(fields: &mut Map<String, Value>, key: &str) -> T {
    match fields.remove(key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            debug!("ignoring malformed '{}' field: {}", key, e);
            T::default()
        }),
    }
}

/// Delivers one JSON request body to the completions server.
///
/// Implementations make exactly one attempt; retrying is the model worker's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// `HttpTransport` posts request bodies to an OpenAI compatible completions
/// server over plain HTTP.
///
/// No request timeout is configured, so a server that never answers keeps
/// the call pending. Any non-2xx status is reported as
/// [`TransportError::Status`] rather than handed on to the decoder.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(TransportError::Status { status, body });
        }

        // read the whole body so the connection can go back to the pool
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_RESPONSE: &str = r#"{
    "id": "cmpl-555e840b-6921-44e8-9f6f-ab9fcd859624",
    "object": "text_completion",
    "created": 1714891381,
    "model": "gpt2",
    "choices": [
        {
            "text": "好",
            "index": 0,
            "logprobs": null,
            "finish_reason": "stop"
        }
    ],
    "usage": {
        "prompt_tokens": 12,
        "completion_tokens": 1,
        "total_tokens": 13
    }
}"#;
