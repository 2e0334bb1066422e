use crate::error::CompletionError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const TRACING_TARGET: &str = "docchat::llm";

/// Text fragments in the order the model produced them. An `Err` item ends
/// the stream abnormally.
pub type FragmentStream = BoxStream<'static, Result<String, CompletionError>>;

/// Incremental text generation from a language model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<FragmentStream, CompletionError>;
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

/// Streams chat completions from an Ollama server.
pub struct OllamaClient {
    http: Client,
    config: OllamaConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, mut config: OllamaConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { http, config }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionModel for OllamaClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<FragmentStream, CompletionError> {
        let request = ChatRequestBody {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            stream: true,
            options: ModelOptions {
                temperature: self.config.temperature,
            },
        };

        tracing::debug!(
            target: TRACING_TARGET,
            model = %self.config.model,
            "opening completion stream"
        );

        let response = self
            .http
            .post(format!("{}/api/chat", self.config.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        Ok(fragment_stream(response.bytes_stream().boxed()))
    }
}

struct DecodeState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineDecoder,
    pending: VecDeque<String>,
    done: bool,
}

impl DecodeState {
    fn accept(&mut self, line: &[u8]) -> Result<(), CompletionError> {
        if self.done || line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let chunk: ChatChunk = serde_json::from_slice(line)?;
        if let Some(error) = chunk.error {
            return Err(CompletionError::Model(error));
        }
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.pending.push_back(message.content);
            }
        }
        self.done = chunk.done;
        Ok(())
    }
}

fn fragment_stream(bytes: BoxStream<'static, reqwest::Result<Bytes>>) -> FragmentStream {
    let state = DecodeState {
        bytes,
        lines: LineDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::try_unfold(state, next_fragment).boxed()
}

async fn next_fragment(
    mut state: DecodeState,
) -> Result<Option<(String, DecodeState)>, CompletionError> {
    loop {
        if let Some(fragment) = state.pending.pop_front() {
            return Ok(Some((fragment, state)));
        }
        if state.done {
            return Ok(None);
        }

        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                for line in state.lines.push(&chunk) {
                    state.accept(&line)?;
                }
            }
            Some(Err(e)) => return Err(CompletionError::Http(e)),
            None => {
                let rest = state.lines.finish();
                state.accept(&rest)?;
                if !state.done {
                    return Err(CompletionError::Model(
                        "stream ended before completion".to_string(),
                    ));
                }
            }
        }
    }
}

/// Splits newline-delimited JSON on byte boundaries, so multi-byte
/// characters cut across network chunks survive.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=idx).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
