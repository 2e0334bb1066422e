mod client;
mod config;
mod documents;
mod error;
mod llm;
mod protocol;
mod server;
mod session;
mod sse;
#[cfg(test)]
mod test_support;

use clap::Parser;
use config::{AskArgs, Cli, Command, ServeArgs};
use documents::DocumentStore;
use llm::{OllamaClient, OllamaConfig};
use protocol::{ChatRequest, EventKind};
use session::SessionEngine;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const TRACING_TARGET: &str = "docchat::startup";

type MainResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Ask(args) => ask(args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(args: ServeArgs) -> MainResult {
    let documents = DocumentStore::new(&args.docs_dir);
    let model = OllamaClient::new(OllamaConfig {
        base_url: args.ollama_url,
        model: args.model,
        temperature: args.temperature,
    });

    tracing::info!(
        target: TRACING_TARGET,
        version = env!("CARGO_PKG_VERSION"),
        docs_dir = %documents.root().display(),
        ollama_url = %model.config().base_url,
        model = %model.config().model,
        "starting docchat"
    );

    let engine = SessionEngine::new(Arc::new(documents.clone()), Arc::new(model));
    let state = server::AppState::new(engine, documents);

    server::run(
        server::ServerConfig {
            listen: args.listen,
            cors_origins: args.cors_origins,
        },
        state,
    )
    .await
}

async fn ask(args: AskArgs) -> MainResult {
    let request = ChatRequest {
        doc_ids: args.doc_ids(),
        message: args.message,
    };
    let config = client::ClientConfig {
        base_url: args.server,
    };

    let mut failure = None;
    let mut stdout = std::io::stdout();
    client::stream_chat(&config, &request, |event| match event.kind {
        EventKind::TextMessageContent { content } => {
            stdout.write_all(content.as_bytes())?;
            stdout.flush()
        }
        EventKind::RunFinished { error, .. } => {
            failure = error;
            writeln!(stdout)
        }
        _ => Ok(()),
    })
    .await?;

    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
