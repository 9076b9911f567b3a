use std::process::exit;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{self, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatpipe::{ChatTemplate, Config, HttpTransport, InputMode, Pipeline, Session};

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Config::from_cli();

    if let Err(e) = run(config).await {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
}

// Logs go to stderr so they never interleave with the chat on stdout
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let url = config.endpoint_url();
    info!("sending completions to {}", url);

    let pipeline = Pipeline::spawn(
        Arc::new(HttpTransport::new()),
        url,
        Box::new(config.backoff()),
    );
    let mode = if config.chat {
        InputMode::Chat
    } else {
        InputMode::Templated
    };
    let session = Session::new(
        ChatTemplate::GEMMA,
        config.parameter_template(),
        mode,
        pipeline,
    );

    session.run(BufReader::new(io::stdin()), io::stdout()).await?;
    Ok(())
}
