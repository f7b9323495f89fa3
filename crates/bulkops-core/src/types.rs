use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Status values carried by outbound status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Started,
    NothingFound,
    Finished,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::NothingFound => "NOTHING_FOUND",
            RunStatus::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::error::BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(RunStatus::Started),
            "NOTHING_FOUND" => Ok(RunStatus::NothingFound),
            "FINISHED" => Ok(RunStatus::Finished),
            other => Err(crate::error::BulkError::InvalidConfig(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// `{"id": <run id>, "status": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub id: i64,
    pub status: RunStatus,
}

impl StatusFrame {
    pub fn new(id: i64, status: RunStatus) -> Self {
        Self { id, status }
    }
}

// ---------------------------------------------------------------------------
// ActionResult
// ---------------------------------------------------------------------------

/// Outcome of one target's action. `success: false` is an action-level
/// outcome that is still delivered; task faults never produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub environment_id: Uuid,
    pub environment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// How a session is closed. Maps onto WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    Normal,
    Error,
}

impl CloseStatus {
    pub fn code(self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::Error => 1011,
        }
    }
}

/// `Open -> Running -> {ClosedNormal, ClosedError}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Running,
    ClosedNormal,
    ClosedError,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::ClosedNormal | SessionState::ClosedError)
    }

    pub fn closed_with(status: CloseStatus) -> Self {
        match status {
            CloseStatus::Normal => SessionState::ClosedNormal,
            CloseStatus::Error => SessionState::ClosedError,
        }
    }
}
