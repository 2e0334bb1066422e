use jiff::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub id: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub status: String,
}

/// One AG-UI protocol event: a discriminated payload plus the time it was
/// constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgUiEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RunStarted {
        run_id: String,
    },
    TextMessageStart,
    TextMessageContent {
        content: String,
    },
    TextMessageEnd,
    RunFinished {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl AgUiEvent {
    pub fn new(kind: EventKind, timestamp: Timestamp) -> Self {
        Self { kind, timestamp }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::RunFinished { .. })
    }
}

impl EventKind {
    pub fn succeeded() -> Self {
        EventKind::RunFinished {
            status: RunStatus::Success,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        EventKind::RunFinished {
            status: RunStatus::Error,
            error: Some(error.into()),
        }
    }

    /// Wire discriminator, as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "RUN_STARTED",
            EventKind::TextMessageStart => "TEXT_MESSAGE_START",
            EventKind::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            EventKind::TextMessageEnd => "TEXT_MESSAGE_END",
            EventKind::RunFinished { .. } => "RUN_FINISHED",
        }
    }
}
