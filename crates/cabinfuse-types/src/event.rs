//! Perceptual events routed over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    EndReason, EventType, GazeDirection, Gesture, Intent, InteractionScenario, ModalityType,
    SessionId,
};

/// Typed payload of a [`ModalityEvent`], one variant per [`EventType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Raw ASR transcript.  `command` is set when the utterance was routed as
    /// an explicit voice command.
    SpeechRecognized {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    /// Output of the speech intent classifier (e.g. `"attention_confirm"`).
    IntentClassified {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        intent: String,
    },
    GestureDetected {
        gesture: Gesture,
    },
    GazeChanged {
        direction: GazeDirection,
    },
    HeadPoseChanged {
        yaw_deg: f32,
        pitch_deg: f32,
        roll_deg: f32,
    },
    DistractionDetected {
        reason: String,
        gaze: GazeDirection,
        session_id: SessionId,
    },
    AttentionConfirmed {
        scenario: InteractionScenario,
        decision: Intent,
        confidence: f64,
        modalities: Vec<ModalityType>,
    },
    InteractionCompleted {
        scenario: InteractionScenario,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decision: Option<Intent>,
    },
    ScenarioStarted {
        scenario: InteractionScenario,
    },
    ScenarioEnded {
        scenario: InteractionScenario,
        reason: EndReason,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SpeechRecognized { .. } => EventType::SpeechRecognized,
            EventPayload::IntentClassified { .. } => EventType::IntentClassified,
            EventPayload::GestureDetected { .. } => EventType::GestureDetected,
            EventPayload::GazeChanged { .. } => EventType::GazeChanged,
            EventPayload::HeadPoseChanged { .. } => EventType::HeadPoseChanged,
            EventPayload::DistractionDetected { .. } => EventType::DistractionDetected,
            EventPayload::AttentionConfirmed { .. } => EventType::AttentionConfirmed,
            EventPayload::InteractionCompleted { .. } => EventType::InteractionCompleted,
            EventPayload::ScenarioStarted { .. } => EventType::ScenarioStarted,
            EventPayload::ScenarioEnded { .. } => EventType::ScenarioEnded,
        }
    }
}

/// A single perceptual (or fused) event.
///
/// Events are immutable once published; the bus and the session store share
/// them as `Arc<ModalityEvent>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityEvent {
    pub id: Uuid,
    pub modality: ModalityType,
    pub timestamp: DateTime<Utc>,
    /// Producer confidence, always within `[0, 1]`.
    pub confidence: f64,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Free-form producer context that has no typed home in the payload.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ModalityEvent {
    /// Create an event stamped with the current time.
    ///
    /// `confidence` is clamped to `[0, 1]`; non-finite values become `0`.
    pub fn new(modality: ModalityType, payload: EventPayload, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            modality,
            timestamp: Utc::now(),
            confidence: normalize_confidence(confidence),
            payload,
            session_id: None,
            extra: Map::new(),
        }
    }

    pub fn gaze(direction: GazeDirection, confidence: f64) -> Self {
        Self::new(ModalityType::Gaze, EventPayload::GazeChanged { direction }, confidence)
    }

    pub fn gesture(gesture: impl Into<Gesture>, confidence: f64) -> Self {
        Self::new(
            ModalityType::Gesture,
            EventPayload::GestureDetected {
                gesture: gesture.into(),
            },
            confidence,
        )
    }

    pub fn speech(text: impl Into<String>, confidence: f64) -> Self {
        Self::new(
            ModalityType::Audio,
            EventPayload::SpeechRecognized {
                text: text.into(),
                command: None,
            },
            confidence,
        )
    }

    pub fn intent(intent: impl Into<String>, confidence: f64) -> Self {
        Self::new(
            ModalityType::Audio,
            EventPayload::IntentClassified {
                text: None,
                intent: intent.into(),
            },
            confidence,
        )
    }

    pub fn head_pose(yaw_deg: f32, pitch_deg: f32, roll_deg: f32, confidence: f64) -> Self {
        Self::new(
            ModalityType::HeadPose,
            EventPayload::HeadPoseChanged {
                yaw_deg,
                pitch_deg,
                roll_deg,
            },
            confidence,
        )
    }

    /// Override the timestamp (replayed or producer-stamped events).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

fn normalize_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
