use serde::{Deserialize, Serialize};

// Fallbacks used by llama-cpp-python's completion server.
pub const DEFAULT_TOP_K: i64 = 40;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_REPEAT_PENALTY: f64 = 1.1;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_MAX_TOKENS: i64 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// What the model is asked to continue: a raw prompt for the plain
/// completions endpoint, or a message list for the chat endpoint.
///
/// Flattened into the request body, so it shows up as either a `prompt`
/// or a `messages` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptInput {
    Prompt(String),
    Messages(Vec<ChatMessage>),
}

impl Default for PromptInput {
    fn default() -> Self {
        PromptInput::Prompt(String::new())
    }
}

/// The body of a completion request.
///
/// A `GenerationParameters` value doubles as a reusable template: the session
/// keeps one around and stamps each user turn into a copy of it with
/// [`GenerationParameters::with_prompt`] or [`GenerationParameters::with_messages`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(rename = "model")]
    pub model_name: String,
    #[serde(flatten)]
    pub input: PromptInput,
    pub top_k: i64,
    pub top_p: f64,
    pub repeat_penalty: f64,
    pub temperature: f64,
    pub stream: bool,
    pub max_tokens: i64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        GenerationParameters {
            model_name: String::new(),
            input: PromptInput::default(),
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
            repeat_penalty: DEFAULT_REPEAT_PENALTY,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl GenerationParameters {
    /// Replaces every out-of-domain numeric field with its default.
    ///
    /// This never fails: zero, negative, NaN and infinite values are all
    /// coerced, as is a `top_p` above 1.0. Fields that are already valid are
    /// left alone, so calling this twice is the same as calling it once.
    pub fn normalize(&mut self) {
        if self.top_k <= 0 {
            self.top_k = DEFAULT_TOP_K;
        }
        if !(self.top_p.is_finite() && self.top_p > 0.0 && self.top_p <= 1.0) {
            self.top_p = DEFAULT_TOP_P;
        }
        if !is_positive(self.repeat_penalty) {
            self.repeat_penalty = DEFAULT_REPEAT_PENALTY;
        }
        if !is_positive(self.temperature) {
            self.temperature = DEFAULT_TEMPERATURE;
        }
        if self.max_tokens <= 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Returns a copy of this template carrying `prompt` as its input.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        GenerationParameters {
            input: PromptInput::Prompt(prompt.into()),
            ..self.clone()
        }
    }

    pub fn with_messages(&self, messages: Vec<ChatMessage>) -> Self {
        GenerationParameters {
            input: PromptInput::Messages(messages),
            ..self.clone()
        }
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broken() -> GenerationParameters {
        GenerationParameters {
            model_name: "gpt2".to_string(),
            input: PromptInput::Prompt("hi".to_string()),
            top_k: 0,
            top_p: 1.5,
            repeat_penalty: -1.0,
            temperature: f64::NAN,
            stream: false,
            max_tokens: -3,
        }
    }

    #[test]
    fn normalize_replaces_invalid_fields_with_defaults() {
        let params = broken().normalized();
        assert_eq!(params.top_k, DEFAULT_TOP_K);
        assert_eq!(params.top_p, DEFAULT_TOP_P);
        assert_eq!(params.repeat_penalty, DEFAULT_REPEAT_PENALTY);
        assert_eq!(params.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(params.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(params.model_name, "gpt2");
        assert_eq!(params.input, PromptInput::Prompt("hi".to_string()));
    }

    #[test]
    fn normalize_keeps_valid_fields() {
        let params = GenerationParameters {
            model_name: "gpt2".to_string(),
            input: PromptInput::default(),
            top_k: 64,
            top_p: 1.0,
            repeat_penalty: 1.3,
            temperature: 0.5,
            stream: true,
            max_tokens: 32,
        };
        assert_eq!(params.clone().normalized(), params);
    }

    #[test]
    fn zero_and_negative_values_fall_back() {
        for bad in [0.0, -0.5, f64::INFINITY] {
            let mut params = GenerationParameters {
                top_p: bad,
                repeat_penalty: bad,
                temperature: bad,
                ..Default::default()
            };
            params.normalize();
            assert_eq!(params.top_p, DEFAULT_TOP_P);
            assert_eq!(params.repeat_penalty, DEFAULT_REPEAT_PENALTY);
            assert_eq!(params.temperature, DEFAULT_TEMPERATURE);
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = broken().normalized();
        let twice = once.clone().normalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn prompt_request_uses_wire_field_names() {
        let params = GenerationParameters::default().with_prompt("hello");
        let body = serde_json::to_value(&params).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "",
                "prompt": "hello",
                "top_k": 40,
                "top_p": 0.95,
                "repeat_penalty": 1.1,
                "temperature": 0.8,
                "stream": false,
                "max_tokens": 16,
            })
        );
    }

    #[test]
    fn message_request_serializes_messages_key() {
        let params = GenerationParameters::default().with_messages(vec![ChatMessage::user("hey")]);
        let body = serde_json::to_value(&params).unwrap();
        assert_eq!(body["messages"], json!([{ "role": "user", "content": "hey" }]));
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn with_prompt_leaves_template_untouched() {
        let template = GenerationParameters {
            top_k: 64,
            ..Default::default()
        };
        let request = template.with_prompt("turn");
        assert_eq!(template.input, PromptInput::default());
        assert_eq!(request.top_k, 64);
    }
}
