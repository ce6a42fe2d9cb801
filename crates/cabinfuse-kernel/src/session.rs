//! [`InteractionSession`] – a bounded, single-scenario window awaiting a
//! fused decision.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cabinfuse_types::{
    EndReason, EventType, InteractionScenario, ModalityEvent, ModalityType, SessionId, SystemState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ────────────────────────────────────────────────────────────────────────────
// Metadata
// ────────────────────────────────────────────────────────────────────────────

/// The event that caused a session to be opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTrigger {
    pub event_type: EventType,
    pub modality: ModalityType,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl SessionTrigger {
    pub fn from_event(event: &ModalityEvent) -> Self {
        Self {
            event_type: event.event_type(),
            modality: event.modality,
            confidence: event.confidence,
            timestamp: event.timestamp,
        }
    }
}

/// Typed session metadata.  `end_reason` and `duration` are stamped when the
/// session ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<SessionTrigger>,
    /// Voice command that opened a `voice_command` session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Gesture that opened a `gesture_control` session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl SessionMetadata {
    pub fn triggered_by(event: &ModalityEvent) -> Self {
        Self {
            trigger: Some(SessionTrigger::from_event(event)),
            ..Self::default()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InteractionSession {
    pub session_id: SessionId,
    pub scenario: InteractionScenario,
    pub start_time: DateTime<Utc>,
    pub state: SystemState,
    pub expected_modalities: BTreeSet<ModalityType>,
    /// Events in arrival order.
    pub received_events: Vec<Arc<ModalityEvent>>,
    pub timeout: Duration,
    pub metadata: SessionMetadata,
}

impl InteractionSession {
    pub fn new(
        scenario: InteractionScenario,
        expected_modalities: BTreeSet<ModalityType>,
        timeout: Duration,
        metadata: SessionMetadata,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            scenario,
            start_time,
            state: SystemState::WaitingResponse,
            expected_modalities,
            received_events: Vec::new(),
            timeout,
            metadata,
        }
    }

    /// Time elapsed between the session start and `now`.  Clock skew that
    /// puts `now` before the start yields zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// A session is expired strictly after its timeout: an age of exactly
    /// `timeout` is still live.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.timeout
    }

    /// Final duration for ended sessions, otherwise the current age.
    pub fn duration(&self) -> Duration {
        self.metadata
            .duration
            .unwrap_or_else(|| self.age_at(Utc::now()))
    }

    pub fn received_modalities(&self) -> BTreeSet<ModalityType> {
        self.received_events.iter().map(|e| e.modality).collect()
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.metadata.end_reason.as_ref()
    }

    pub fn info_at(&self, now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            scenario: self.scenario.clone(),
            state: self.state,
            elapsed_secs: self.age_at(now).as_secs_f64(),
            timeout_secs: self.timeout.as_secs_f64(),
            is_expired: self.is_expired_at(now),
            expected_modalities: self.expected_modalities.iter().copied().collect(),
            received_modalities: self.received_modalities().into_iter().collect(),
            events_count: self.received_events.len(),
        }
    }
}

/// Read-only summary of the active session for dashboards and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub scenario: InteractionScenario,
    pub state: SystemState,
    pub elapsed_secs: f64,
    pub timeout_secs: f64,
    pub is_expired: bool,
    pub expected_modalities: Vec<ModalityType>,
    pub received_modalities: Vec<ModalityType>,
    pub events_count: usize,
}

/// Aggregates over the ended-session history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub timeout_sessions: usize,
    pub completion_rate: f64,
    pub avg_duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinfuse_types::GazeDirection;
    use chrono::TimeDelta;

    fn session(timeout: Duration, start: DateTime<Utc>) -> InteractionSession {
        InteractionSession::new(
            InteractionScenario::DistractionAlert,
            [ModalityType::Audio, ModalityType::Gesture].into_iter().collect(),
            timeout,
            SessionMetadata::default(),
            start,
        )
    }

    #[test]
    fn expiry_boundary_is_strict() {
        let start = Utc::now();
        let s = session(Duration::from_millis(500), start);

        assert!(!s.is_expired_at(start));
        assert!(!s.is_expired_at(start + TimeDelta::milliseconds(500)));
        assert!(s.is_expired_at(start + TimeDelta::milliseconds(501)));
    }

    #[test]
    fn age_before_start_is_zero() {
        let start = Utc::now();
        let s = session(Duration::from_secs(1), start);
        assert_eq!(s.age_at(start - TimeDelta::seconds(5)), Duration::ZERO);
    }

    #[test]
    fn info_reports_received_modalities() {
        let start = Utc::now();
        let mut s = session(Duration::from_secs(10), start);
        s.received_events
            .push(Arc::new(ModalityEvent::gaze(GazeDirection::Left, 0.9)));
        s.received_events
            .push(Arc::new(ModalityEvent::gesture("ok", 0.8)));
        s.received_events
            .push(Arc::new(ModalityEvent::gesture("wave", 0.8)));

        let info = s.info_at(start + TimeDelta::seconds(2));
        assert_eq!(info.events_count, 3);
        assert_eq!(
            info.received_modalities,
            vec![ModalityType::Gesture, ModalityType::Gaze]
        );
        assert_eq!(
            info.expected_modalities,
            vec![ModalityType::Audio, ModalityType::Gesture]
        );
        assert!((info.elapsed_secs - 2.0).abs() < 1e-9);
        assert!(!info.is_expired);
    }

    #[test]
    fn metadata_records_trigger() {
        let event = ModalityEvent::gaze(GazeDirection::Right, 0.75);
        let meta = SessionMetadata::triggered_by(&event);
        let trigger = meta.trigger.expect("trigger recorded");
        assert_eq!(trigger.event_type, EventType::GazeChanged);
        assert_eq!(trigger.confidence, 0.75);
    }
}
