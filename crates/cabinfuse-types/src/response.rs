//! Outbound responses handed to the external responder (TTS, UI, actions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{GazeDirection, Intent, InteractionScenario, SessionId};

/// Channel a response is rendered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Text,
    Audio,
    Visual,
    Haptic,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Text => "text",
            ResponseType::Audio => "audio",
            ResponseType::Visual => "visual",
            ResponseType::Haptic => "haptic",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What prompted a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    DistractionAlert,
    Acknowledgement,
    TimeoutReminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePriority {
    Normal,
    High,
}

/// Rendering hints and provenance attached to a [`SystemResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub kind: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<InteractionScenario>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze: Option<GazeDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Intent>,
    /// Audio responses that should be spoken as a prompt awaiting an answer.
    #[serde(default)]
    pub voice_prompt: bool,
    /// How long a visual banner stays on screen, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_secs: Option<f64>,
    pub priority: ResponsePriority,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ResponseMetadata {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            session_id: None,
            scenario: None,
            gaze: None,
            decision: None,
            voice_prompt: false,
            display_secs: None,
            priority: ResponsePriority::Normal,
            extra: Map::new(),
        }
    }
}

/// A single outward-facing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemResponse {
    pub response_type: ResponseType,
    pub content: String,
    pub metadata: ResponseMetadata,
    pub timestamp: DateTime<Utc>,
}

impl SystemResponse {
    pub fn new(response_type: ResponseType, content: impl Into<String>, metadata: ResponseMetadata) -> Self {
        Self {
            response_type,
            content: content.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}
