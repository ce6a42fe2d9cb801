//! `cabinfuse-types` – shared vocabulary of the cockpit fusion stack.
//!
//! Every other crate speaks in terms of the types defined here:
//!
//! - [`ModalityEvent`] / [`EventPayload`] – the typed perceptual events that
//!   producers publish onto the bus.
//! - [`SystemState`], [`InteractionScenario`], [`EndReason`] – the session
//!   state machine vocabulary.
//! - [`SystemResponse`] – what the core hands back to the outside world.
//! - [`CabinError`] – the single error type shared by all crates.

pub mod event;
pub mod response;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use event::{EventPayload, ModalityEvent};
pub use response::{ResponseKind, ResponseMetadata, ResponsePriority, ResponseType, SystemResponse};

// ────────────────────────────────────────────────────────────────────────────
// Modalities & event types
// ────────────────────────────────────────────────────────────────────────────

/// Perceptual channel an event was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityType {
    Audio,
    Vision,
    Gesture,
    Gaze,
    HeadPose,
}

impl ModalityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModalityType::Audio => "audio",
            ModalityType::Vision => "vision",
            ModalityType::Gesture => "gesture",
            ModalityType::Gaze => "gaze",
            ModalityType::HeadPose => "head_pose",
        }
    }
}

impl fmt::Display for ModalityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing key on the event bus.  Derived from the [`EventPayload`] variant,
/// so an event can never carry a payload that disagrees with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Speech
    SpeechRecognized,
    IntentClassified,
    // Vision
    GestureDetected,
    GazeChanged,
    HeadPoseChanged,
    // Fusion output
    DistractionDetected,
    AttentionConfirmed,
    InteractionCompleted,
    // Session lifecycle
    ScenarioStarted,
    ScenarioEnded,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::SpeechRecognized,
        EventType::IntentClassified,
        EventType::GestureDetected,
        EventType::GazeChanged,
        EventType::HeadPoseChanged,
        EventType::DistractionDetected,
        EventType::AttentionConfirmed,
        EventType::InteractionCompleted,
        EventType::ScenarioStarted,
        EventType::ScenarioEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SpeechRecognized => "speech_recognized",
            EventType::IntentClassified => "intent_classified",
            EventType::GestureDetected => "gesture_detected",
            EventType::GazeChanged => "gaze_changed",
            EventType::HeadPoseChanged => "head_pose_changed",
            EventType::DistractionDetected => "distraction_detected",
            EventType::AttentionConfirmed => "attention_confirmed",
            EventType::InteractionCompleted => "interaction_completed",
            EventType::ScenarioStarted => "scenario_started",
            EventType::ScenarioEnded => "scenario_ended",
        }
    }

    /// `true` for the raw perceptual events that the fusion engine consumes.
    pub fn is_perceptual(&self) -> bool {
        matches!(
            self,
            EventType::SpeechRecognized
                | EventType::IntentClassified
                | EventType::GestureDetected
                | EventType::GazeChanged
                | EventType::HeadPoseChanged
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Perceptual labels
// ────────────────────────────────────────────────────────────────────────────

/// Coarse gaze direction reported by the eye tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Center,
    Left,
    Right,
    Up,
    Down,
}

impl GazeDirection {
    /// Any direction other than [`GazeDirection::Center`] counts as the
    /// driver looking away from the road.
    pub fn is_deviation(&self) -> bool {
        !matches!(self, GazeDirection::Center)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GazeDirection::Center => "center",
            GazeDirection::Left => "left",
            GazeDirection::Right => "right",
            GazeDirection::Up => "up",
            GazeDirection::Down => "down",
        }
    }
}

impl fmt::Display for GazeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GazeDirection {
    type Err = CabinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" => Ok(GazeDirection::Center),
            "left" => Ok(GazeDirection::Left),
            "right" => Ok(GazeDirection::Right),
            "up" => Ok(GazeDirection::Up),
            "down" => Ok(GazeDirection::Down),
            other => Err(CabinError::InvalidInput(format!("unknown gaze direction '{other}'"))),
        }
    }
}

/// Hand gesture label produced by the keypoint classifier.
///
/// The classifier's label set is open, so unknown labels are preserved in
/// [`Gesture::Other`] rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Gesture {
    ThumbsUp,
    ThumbsDown,
    Ok,
    Stop,
    Wave,
    Other(String),
}

impl Gesture {
    pub fn as_str(&self) -> &str {
        match self {
            Gesture::ThumbsUp => "thumbs_up",
            Gesture::ThumbsDown => "thumbs_down",
            Gesture::Ok => "ok",
            Gesture::Stop => "stop",
            Gesture::Wave => "wave",
            Gesture::Other(label) => label,
        }
    }
}

impl From<&str> for Gesture {
    fn from(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "thumbs_up" => Gesture::ThumbsUp,
            "thumbs_down" => Gesture::ThumbsDown,
            "ok" => Gesture::Ok,
            "stop" => Gesture::Stop,
            "wave" => Gesture::Wave,
            _ => Gesture::Other(label.to_string()),
        }
    }
}

impl From<String> for Gesture {
    fn from(label: String) -> Self {
        Gesture::from(label.as_str())
    }
}

impl From<Gesture> for String {
    fn from(gesture: Gesture) -> Self {
        gesture.as_str().to_string()
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised intent label that modalities are fused on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Confirm,
    Attention,
    Reject,
    Distraction,
    /// Pass-through label from the speech intent classifier.
    Other(String),
}

impl Intent {
    /// `true` for decisions that mean the driver is back on the road.
    pub fn is_affirmative(&self) -> bool {
        matches!(self, Intent::Confirm | Intent::Attention)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Intent::Confirm => "confirm",
            Intent::Attention => "attention",
            Intent::Reject => "reject",
            Intent::Distraction => "distraction",
            Intent::Other(label) => label,
        }
    }
}

impl From<String> for Intent {
    fn from(label: String) -> Self {
        match label.as_str() {
            "confirm" => Intent::Confirm,
            "attention" => Intent::Attention,
            "reject" => Intent::Reject,
            "distraction" => Intent::Distraction,
            _ => Intent::Other(label),
        }
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.as_str().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sessions
// ────────────────────────────────────────────────────────────────────────────

/// Unique identifier of an interaction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named interaction pattern, each with its own fusion rule.
///
/// The three built-in scenarios cover the cockpit's needs today;
/// [`InteractionScenario::Custom`] keeps the set open for new ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InteractionScenario {
    DistractionAlert,
    VoiceCommand,
    GestureControl,
    Custom(String),
}

impl InteractionScenario {
    pub fn as_str(&self) -> &str {
        match self {
            InteractionScenario::DistractionAlert => "distraction_alert",
            InteractionScenario::VoiceCommand => "voice_command",
            InteractionScenario::GestureControl => "gesture_control",
            InteractionScenario::Custom(name) => name,
        }
    }
}

impl From<String> for InteractionScenario {
    fn from(name: String) -> Self {
        match name.as_str() {
            "distraction_alert" => InteractionScenario::DistractionAlert,
            "voice_command" => InteractionScenario::VoiceCommand,
            "gesture_control" => InteractionScenario::GestureControl,
            _ => InteractionScenario::Custom(name),
        }
    }
}

impl From<InteractionScenario> for String {
    fn from(scenario: InteractionScenario) -> Self {
        scenario.as_str().to_string()
    }
}

impl fmt::Display for InteractionScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global interaction state.
///
/// Only [`SystemState::Idle`] and [`SystemState::WaitingResponse`] are driven
/// by the built-in rule set; the others are reachable through
/// `StateManager::change_state` for extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Idle,
    Monitoring,
    DistractionDetected,
    WaitingResponse,
    ProcessingResponse,
    InteractionComplete,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::Monitoring => "monitoring",
            SystemState::DistractionDetected => "distraction_detected",
            SystemState::WaitingResponse => "waiting_response",
            SystemState::ProcessingResponse => "processing_response",
            SystemState::InteractionComplete => "interaction_complete",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EndReason {
    /// Force-ended because another session was started.
    NewSessionStarted,
    /// The session outlived its timeout.
    Timeout,
    /// Fusion concluded the driver is paying attention again.
    AttentionConfirmed,
    Completed,
    Manual,
    Custom(String),
}

impl EndReason {
    pub fn as_str(&self) -> &str {
        match self {
            EndReason::NewSessionStarted => "new_session_started",
            EndReason::Timeout => "timeout",
            EndReason::AttentionConfirmed => "attention_confirmed",
            EndReason::Completed => "completed",
            EndReason::Manual => "manual",
            EndReason::Custom(reason) => reason,
        }
    }

    /// Sessions that reached a decision rather than being abandoned.
    pub fn is_completion(&self) -> bool {
        matches!(self, EndReason::AttentionConfirmed | EndReason::Completed)
    }
}

impl From<String> for EndReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "new_session_started" => EndReason::NewSessionStarted,
            "timeout" => EndReason::Timeout,
            "attention_confirmed" => EndReason::AttentionConfirmed,
            "completed" => EndReason::Completed,
            "manual" => EndReason::Manual,
            _ => EndReason::Custom(reason),
        }
    }
}

impl From<EndReason> for String {
    fn from(reason: EndReason) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared across the fusion stack.
#[derive(Error, Debug)]
pub enum CabinError {
    /// A bus subscriber or state-change callback failed.
    #[error("Event handler failed: {0}")]
    Handler(String),

    /// The reminder timer could not be started.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Producer-supplied data could not be interpreted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gesture_labels_parse_and_preserve_unknowns() {
        assert_eq!(Gesture::from("thumbs_up"), Gesture::ThumbsUp);
        assert_eq!(Gesture::from("OK"), Gesture::Ok);
        assert_eq!(Gesture::from("peace"), Gesture::Other("peace".to_string()));
        assert_eq!(Gesture::Other("peace".into()).to_string(), "peace");
    }

    #[test]
    fn perceptual_event_types() {
        let perceptual: Vec<EventType> = EventType::ALL
            .into_iter()
            .filter(EventType::is_perceptual)
            .collect();
        assert_eq!(perceptual.len(), 5);
        assert!(perceptual.contains(&EventType::HeadPoseChanged));
        assert!(!EventType::AttentionConfirmed.is_perceptual());
        assert!(!EventType::ScenarioStarted.is_perceptual());
    }

    #[test]
    fn gaze_direction_deviation() {
        assert!(!GazeDirection::Center.is_deviation());
        assert!(GazeDirection::Left.is_deviation());
        assert!(GazeDirection::Down.is_deviation());
        assert_eq!("Right".parse::<GazeDirection>().unwrap(), GazeDirection::Right);
        assert!("sideways".parse::<GazeDirection>().is_err());
    }

    #[test]
    fn scenario_serializes_as_plain_string() {
        let json = serde_json::to_string(&InteractionScenario::DistractionAlert).unwrap();
        assert_eq!(json, "\"distraction_alert\"");
        let custom: InteractionScenario = serde_json::from_str("\"parking_assist\"").unwrap();
        assert_eq!(custom, InteractionScenario::Custom("parking_assist".into()));
    }

    #[test]
    fn end_reason_completion_classification() {
        assert!(EndReason::AttentionConfirmed.is_completion());
        assert!(EndReason::Completed.is_completion());
        assert!(!EndReason::Timeout.is_completion());
        assert!(!EndReason::NewSessionStarted.is_completion());
        assert_eq!(EndReason::from("timeout".to_string()), EndReason::Timeout);
    }

    #[test]
    fn intent_affirmative_labels() {
        assert!(Intent::Confirm.is_affirmative());
        assert!(Intent::Attention.is_affirmative());
        assert!(!Intent::Reject.is_affirmative());
        assert!(!Intent::Other("navigate".into()).is_affirmative());
    }

    #[test]
    fn session_id_short_form() {
        let id = SessionId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().starts_with(&id.short()));
    }

    #[test]
    fn cabin_error_display() {
        let err = CabinError::Handler("boom".to_string());
        assert!(err.to_string().contains("boom"));
    }
}
