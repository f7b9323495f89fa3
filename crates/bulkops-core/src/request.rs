//! Inbound frame decoding.
//!
//! A bulk-action session carries exactly one JSON text frame describing the
//! run. Fields the engine does not understand are kept in `params` and
//! handed to the action untouched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BulkError, Result};

/// Characters of a rejected frame kept in the decode error.
const FRAME_EXCERPT_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionConfig {
    pub project_id: Uuid,
    #[serde(default)]
    pub environment_id: Option<Uuid>,
    #[serde(default)]
    pub system_id: Option<Uuid>,
    #[serde(default)]
    pub execute_in_parallel: bool,
    #[serde(default)]
    pub send_result: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Action-specific fields, opaque to the engine.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl BulkActionConfig {
    /// Decode one inbound text frame. Malformed JSON or a missing
    /// `projectId` is a decode failure.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|source| BulkError::Decode {
            excerpt: frame_excerpt(frame),
            source,
        })
    }

    /// A config targeting `project_id` with every flag off.
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id,
            environment_id: None,
            system_id: None,
            execute_in_parallel: false,
            send_result: false,
            recipients: Vec::new(),
            params: serde_json::Map::new(),
        }
    }
}

fn frame_excerpt(frame: &str) -> String {
    match frame.char_indices().nth(FRAME_EXCERPT_LIMIT) {
        Some((cut, _)) => format!("{}... ({} bytes)", &frame[..cut], frame.len()),
        None => frame.to_string(),
    }
}
