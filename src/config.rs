use clap::Parser;
use std::env;
use std::time::Duration;

use crate::params::GenerationParameters;
use crate::worker::FixedBackoff;

const SERVER_ENV_VAR: &str = "CHATPIPE_SERVER";

#[derive(Debug, Parser)]
#[clap(
    name = "chatpipe",
    version = "0.1.0",
    about = "An interactive chat with a model behind a local completions server. Type 'exit' to quit."
)]
pub struct Config {
    #[clap(
        long,
        value_name = "HOST",
        help = "The host running the completions server; if absent, the envvar 'CHATPIPE_SERVER' is checked, then 'localhost'",
        default_value = ""
    )]
    pub server: String,

    #[clap(
        long,
        value_name = "PORT",
        help = "The port the completions server listens on",
        default_value_t = 8000
    )]
    pub port: u16,

    #[clap(
        long,
        value_name = "PATH",
        help = "The endpoint path; defaults to 'v1/completions', or 'v1/chat/completions' with '--chat'"
    )]
    pub endpoint: Option<String>,

    #[clap(
        long("model"),
        value_name = "MODEL_ID",
        help = "Sets the model name sent with each request",
        default_value = ""
    )]
    pub model_id: String,

    #[clap(
        long,
        value_name = "BOOL",
        help = "Send the user's text as a chat message list instead of a templated prompt",
        default_value_t = false
    )]
    pub chat: bool,

    #[clap(
        short('n'),
        long,
        value_name = "INT",
        help = "Sets the maximum number of tokens to generate in the completion",
        default_value_t = 32
    )]
    pub max_tokens: i64,

    #[clap(
        long,
        value_name = "F64",
        help = "Sets the temperature for sampling",
        default_value_t = 0.9
    )]
    pub temp: f64,

    #[clap(
        long,
        value_name = "F64",
        help = "Include only the top tokens whose probabilities add up to P when sampling",
        default_value_t = 0.9
    )]
    pub top_p: f64,

    #[clap(
        long,
        value_name = "INT",
        help = "Include only this amount of top tokens when sampling",
        default_value_t = 64
    )]
    pub top_k: i64,

    #[clap(
        long,
        value_name = "F64",
        help = "A higher value makes the model less likely to repeat tokens",
        default_value_t = 1.2
    )]
    pub rep_pen: f64,

    #[clap(
        long,
        value_name = "MILLIS",
        help = "How long to wait before retrying a failed request",
        default_value_t = 1000
    )]
    pub retry_delay_ms: u64,
}

impl Config {
    pub fn from_cli() -> Self {
        Config::parse().with_env_fallbacks()
    }

    fn with_env_fallbacks(self) -> Self {
        let from_env = env::var(SERVER_ENV_VAR).ok();
        self.with_server_fallback(from_env)
    }

    // Fallback to `from_env`, then to localhost, if no server was given
    fn with_server_fallback(mut self, from_env: Option<String>) -> Self {
        if self.server.is_empty() {
            self.server = from_env
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "localhost".to_string());
        }
        self
    }

    pub fn endpoint(&self) -> &str {
        match &self.endpoint {
            Some(e) => e.trim_start_matches('/'),
            None if self.chat => "v1/chat/completions",
            None => "v1/completions",
        }
    }

    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}/{}", self.server, self.port, self.endpoint())
    }

    /// The request template every user turn is stamped into.
    pub fn parameter_template(&self) -> GenerationParameters {
        GenerationParameters {
            model_name: self.model_id.clone(),
            top_k: self.top_k,
            top_p: self.top_p,
            repeat_penalty: self.rep_pen,
            temperature: self.temp,
            stream: false,
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> FixedBackoff {
        FixedBackoff::new(Duration::from_millis(self.retry_delay_ms))
    }
}

/// The fixed turn markers the target model was instruction-tuned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTemplate {
    pub user_open: &'static str,
    pub user_close: &'static str,
    pub turn_end: &'static str,
}

impl ChatTemplate {
    pub const GEMMA: ChatTemplate = ChatTemplate {
        user_open: "<start_of_turn>user\n",
        user_close: "<end_of_turn>\n<start_of_turn>model\n",
        turn_end: "<end_of_turn>",
    };

    /// Wraps a user's text in a single user turn and opens the model's turn.
    pub fn format(&self, text: &str) -> String {
        let mut out =
            String::with_capacity(self.user_open.len() + text.len() + self.user_close.len());
        out.push_str(self.user_open);
        out.push_str(text);
        out.push_str(self.user_close);
        out
    }

    /// Cuts a completion at the first turn-end marker, if the model emitted one.
    pub fn strip_turn_end<'a>(&self, completion: &'a str) -> &'a str {
        match completion.find(self.turn_end) {
            Some(pos) => &completion[..pos],
            None => completion,
        }
    }
}

impl Default for ChatTemplate {
    fn default() -> Self {
        ChatTemplate::GEMMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["chatpipe"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn format_wraps_text_in_turn_markers() {
        assert_eq!(
            ChatTemplate::GEMMA.format("hi"),
            "<start_of_turn>user\nhi<end_of_turn>\n<start_of_turn>model\n"
        );
    }

    #[test]
    fn format_accepts_empty_text() {
        assert_eq!(
            ChatTemplate::GEMMA.format(""),
            "<start_of_turn>user\n<end_of_turn>\n<start_of_turn>model\n"
        );
    }

    #[test]
    fn strip_turn_end_cuts_at_marker() {
        let template = ChatTemplate::GEMMA;
        assert_eq!(template.strip_turn_end("Hello!<end_of_turn>\n"), "Hello!");
        assert_eq!(template.strip_turn_end("no marker"), "no marker");
    }

    #[test]
    fn defaults_build_plain_completions_url() {
        let config = parse(&["--server", "backend"]);
        assert_eq!(config.endpoint_url(), "http://backend:8000/v1/completions");
    }

    #[test]
    fn missing_server_falls_back_to_localhost() {
        let config = parse(&[]).with_server_fallback(None);
        assert_eq!(config.endpoint_url(), "http://localhost:8000/v1/completions");

        let config = parse(&[]).with_server_fallback(Some(String::new()));
        assert_eq!(config.server, "localhost");
    }

    #[test]
    fn explicit_server_wins_over_environment() {
        let config = parse(&["--server", "backend"]).with_server_fallback(Some("envhost".into()));
        assert_eq!(config.server, "backend");
    }

    #[test]
    fn missing_server_reads_environment() {
        // the only test touching this variable, so parallel tests can't race on it
        env::set_var(SERVER_ENV_VAR, "envhost");
        let from_env = parse(&[]).with_env_fallbacks();
        env::remove_var(SERVER_ENV_VAR);
        let unset = parse(&[]).with_env_fallbacks();

        assert_eq!(from_env.endpoint_url(), "http://envhost:8000/v1/completions");
        assert_eq!(unset.server, "localhost");
    }

    #[test]
    fn chat_mode_switches_default_endpoint() {
        let config = parse(&["--server", "h", "--port", "9000", "--chat"]);
        assert_eq!(config.endpoint_url(), "http://h:9000/v1/chat/completions");
    }

    #[test]
    fn explicit_endpoint_tolerates_leading_slash() {
        let config = parse(&["--server", "h", "--endpoint", "/generate"]);
        assert_eq!(config.endpoint_url(), "http://h:8000/generate");
    }

    #[test]
    fn parameter_template_carries_sampling_options() {
        let config = parse(&["--model", "gemma", "--top-k", "10", "--temp", "0.3", "-n", "5"]);
        let params = config.parameter_template();
        assert_eq!(params.model_name, "gemma");
        assert_eq!(params.top_k, 10);
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.max_tokens, 5);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.repeat_penalty, 1.2);
        assert!(!params.stream);
    }
}
