use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "docchat",
    version,
    about = "Chat with a folder of documents over AG-UI server-sent events"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the document and chat API.
    Serve(ServeArgs),
    /// Ask a running server a question and print the streamed answer.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "DOCCHAT_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: String,

    /// Directory holding the `.txt` and `.md` documents.
    #[arg(long, env = "DOCCHAT_DOCS_DIR", default_value = "docs")]
    pub docs_dir: PathBuf,

    /// Base URL of the Ollama server.
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    /// Ollama model name.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "mistral:latest")]
    pub model: String,

    /// Sampling temperature.
    #[arg(long, env = "OLLAMA_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// Origins allowed to call the API from a browser.
    #[arg(
        long = "cors-origin",
        env = "DOCCHAT_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173"
    )]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AskArgs {
    /// Base URL of a running docchat server.
    #[arg(long, env = "DOCCHAT_SERVER", default_value = "http://127.0.0.1:8000")]
    pub server: String,

    /// Restrict the context to this document id. Repeatable; defaults to
    /// every document.
    #[arg(long = "doc", conflicts_with = "no_context")]
    pub docs: Vec<String>,

    /// Ask without any document context.
    #[arg(long)]
    pub no_context: bool,

    /// The question to ask.
    pub message: String,
}

impl AskArgs {
    pub fn doc_ids(&self) -> Option<Vec<String>> {
        if self.no_context {
            Some(Vec::new())
        } else if self.docs.is_empty() {
            None
        } else {
            Some(self.docs.clone())
        }
    }
}
