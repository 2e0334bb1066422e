//! Server-Sent Events framing for AG-UI events.
//!
//! Every event becomes exactly one `data: <json>\n\n` frame. The decoding
//! half is used by the `ask` client to read a chat stream back.

use crate::protocol::AgUiEvent;
use bytes::Bytes;

pub const CONTENT_TYPE: &str = "text/event-stream";

/// Serializes one event into one SSE frame.
pub fn frame(event: &AgUiEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Recovers an event from a single SSE block (the text between two blank
/// lines). Blocks without `data:` lines or with unparseable payloads yield
/// `None`.
pub fn parse_frame(raw: &str) -> Option<AgUiEvent> {
    let data = extract_sse_data(raw)?;
    serde_json::from_str(&data).ok()
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// Splits an incoming byte stream into SSE blocks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every block it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut blocks = Vec::new();
        while let Some(idx) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..idx + 2).collect();
            blocks.push(String::from_utf8_lossy(&block[..idx]).into_owned());
        }
        blocks
    }
}
