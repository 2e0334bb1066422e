use crate::protocol::{AgUiEvent, ChatRequest};
use crate::sse::{FrameDecoder, parse_frame};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use std::error::Error;
use std::io;

const TRACING_TARGET: &str = "docchat::client";

pub struct ClientConfig {
    pub base_url: String,
}

type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Posts a chat request and hands every decoded AG-UI event to `on_event`
/// as it arrives. Returns after the terminal event. A stream closed before
/// `RUN_FINISHED` is an error.
pub async fn stream_chat<F>(
    config: &ClientConfig,
    request: &ChatRequest,
    mut on_event: F,
) -> ClientResult<()>
where
    F: FnMut(AgUiEvent) -> io::Result<()>,
{
    let http = HttpClient::new();
    let response = http
        .post(format!("{}/api/chat/stream", normalize_base_url(&config.base_url)))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("Failed to open stream: {} - {}", status, body).into());
    }

    let mut stream = response.bytes_stream();
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for block in decoder.push(&chunk) {
            let Some(event) = parse_frame(&block) else {
                continue;
            };
            tracing::debug!(target: TRACING_TARGET, event = event.kind.name(), "event received");
            let terminal = event.is_terminal();
            on_event(event)?;
            if terminal {
                return Ok(());
            }
        }
    }

    Err("stream closed before the run finished".into())
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
