//! [`ScenarioHandler`] – turns fused outcomes and session transitions into
//! driver-facing responses.
//!
//! | Trigger | Responses |
//! |---|---|
//! | `DISTRACTION_DETECTED` | alert triad (text, voice prompt, high-priority banner) + reminder |
//! | `WAITING_RESPONSE` | reminder for the new session |
//! | reminder fires while still waiting | reminder triad |
//! | `ATTENTION_CONFIRMED` | acknowledgement triad |
//! | `IDLE` | every pending reminder is cancelled |
//!
//! It also starts the voice-command and gesture-control scenarios on behalf
//! of external producers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cabinfuse_kernel::{SessionMetadata, StateManager, StateTransition};
use cabinfuse_middleware::{EventBus, SubscriptionId};
use cabinfuse_types::{
    CabinError, EventPayload, EventType, GazeDirection, Gesture, Intent, InteractionScenario,
    ModalityEvent, ModalityType, ResponseKind, ResponseMetadata, ResponsePriority, ResponseType,
    SessionId, SystemResponse, SystemState,
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::reminder::ReminderScheduler;
use crate::responder::Responder;

/// Responses newer than this many seconds count as recent in
/// [`ResponseStats`].
const RECENT_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSettings {
    pub reminder_delay: Duration,
    pub voice_command_timeout: Duration,
    pub gesture_control_timeout: Duration,
    pub response_history: usize,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            reminder_delay: Duration::from_secs(8),
            voice_command_timeout: Duration::from_secs(8),
            gesture_control_timeout: Duration::from_secs(5),
            response_history: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStats {
    pub total_responses: usize,
    pub type_stats: BTreeMap<String, usize>,
    /// Responses without a scenario are counted under `"unknown"`.
    pub scenario_stats: BTreeMap<String, usize>,
    pub recent_responses: usize,
}

pub struct ScenarioHandler {
    bus: EventBus,
    state: Arc<StateManager>,
    responder: Arc<dyn Responder>,
    reminders: ReminderScheduler,
    history: Mutex<VecDeque<SystemResponse>>,
    settings: ScenarioSettings,
    subscriptions: Vec<(EventType, SubscriptionId)>,
}

impl ScenarioHandler {
    pub fn new(
        bus: EventBus,
        state: Arc<StateManager>,
        responder: Arc<dyn Responder>,
        settings: ScenarioSettings,
    ) -> Result<Arc<Self>, CabinError> {
        let reminders = ReminderScheduler::new(settings.reminder_delay)?;

        let handler = Arc::new_cyclic(|weak: &Weak<ScenarioHandler>| {
            let subscriptions = [
                EventType::DistractionDetected,
                EventType::AttentionConfirmed,
                EventType::InteractionCompleted,
            ]
            .into_iter()
            .map(|event_type| {
                let weak = Weak::clone(weak);
                let id = bus.subscribe(event_type, move |event| match weak.upgrade() {
                    Some(handler) => handler.handle_event(event),
                    None => Ok(()),
                });
                (event_type, id)
            })
            .collect();

            ScenarioHandler {
                bus: bus.clone(),
                state: Arc::clone(&state),
                responder,
                reminders,
                history: Mutex::new(VecDeque::new()),
                settings,
                subscriptions,
            }
        });

        for target in [
            SystemState::WaitingResponse,
            SystemState::InteractionComplete,
            SystemState::Idle,
        ] {
            let weak = Arc::downgrade(&handler);
            state.subscribe_state_change(target, move |transition| {
                if let Some(handler) = weak.upgrade() {
                    handler.on_transition(transition);
                }
            });
        }

        Ok(handler)
    }

    // -------------------------------------------------------------------------
    // Bus events
    // -------------------------------------------------------------------------

    fn handle_event(self: &Arc<Self>, event: &Arc<ModalityEvent>) -> Result<(), CabinError> {
        match &event.payload {
            EventPayload::DistractionDetected {
                gaze, session_id, ..
            } => {
                for response in distraction_alert(*gaze, *session_id) {
                    self.send(response);
                }
                info!(session = %session_id.short(), "distraction alert sent");
                self.schedule_reminder(*session_id);
            }
            EventPayload::AttentionConfirmed {
                scenario, decision, ..
            } => {
                for response in acknowledgement(decision, scenario, event.session_id) {
                    self.send(response);
                }
                info!(decision = %decision, "attention acknowledged");
            }
            EventPayload::InteractionCompleted { scenario, decision } => {
                info!(
                    scenario = %scenario,
                    decision = decision.as_ref().map(Intent::as_str).unwrap_or("none"),
                    session = %event.session_id.map(|id| id.short()).unwrap_or_default(),
                    "interaction completed"
                );
            }
            other => {
                return Err(CabinError::Handler(format!(
                    "scenario handler received unexpected {} event",
                    other.event_type()
                )));
            }
        }
        Ok(())
    }

    fn on_transition(self: &Arc<Self>, transition: &StateTransition) {
        match transition.to {
            SystemState::WaitingResponse => {
                let Some(session_id) = transition.session_id else {
                    return;
                };
                info!(
                    session = %session_id.short(),
                    scenario = %transition.scenario.as_ref().map(InteractionScenario::as_str).unwrap_or("unknown"),
                    expected = ?transition.expected_modalities,
                    "waiting for driver response"
                );
                self.schedule_reminder(session_id);
            }
            SystemState::InteractionComplete => info!("interaction flow complete"),
            SystemState::Idle => {
                let cancelled = self.reminders.cancel_all();
                if cancelled > 0 {
                    debug!(cancelled, "pending reminders cancelled");
                }
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Reminders
    // -------------------------------------------------------------------------

    fn schedule_reminder(self: &Arc<Self>, session_id: SessionId) {
        let weak = Arc::downgrade(self);
        self.reminders.schedule(session_id, move || {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            if !handler.state.is_awaiting_response(session_id) {
                debug!(session = %session_id.short(), "stale reminder dropped");
                return;
            }
            let scenario = handler.state.current_session().map(|s| s.scenario);
            for response in timeout_reminder(session_id, scenario) {
                handler.send(response);
            }
            info!(session = %session_id.short(), "timeout reminder sent");
        });
    }

    pub fn pending_reminders(&self) -> usize {
        self.reminders.pending_count()
    }

    // -------------------------------------------------------------------------
    // Scenario triggers
    // -------------------------------------------------------------------------

    /// Open a `voice_command` session and publish the command as its seed
    /// speech event.
    pub fn trigger_voice_command_scenario(&self, command: &str, confidence: f64) -> SessionId {
        let session_id = self.state.start_interaction(
            InteractionScenario::VoiceCommand,
            [ModalityType::Audio, ModalityType::Gesture],
            self.settings.voice_command_timeout,
            SessionMetadata {
                command: Some(command.to_string()),
                ..SessionMetadata::default()
            },
        );

        let seed = ModalityEvent::new(
            ModalityType::Audio,
            EventPayload::SpeechRecognized {
                text: command.to_string(),
                command: Some(command.to_string()),
            },
            confidence,
        )
        .with_session(session_id);
        self.bus.publish(seed);
        session_id
    }

    /// Open a `gesture_control` session and publish `gesture` as its seed
    /// event.
    pub fn trigger_gesture_control_scenario(&self, gesture: &str, confidence: f64) -> SessionId {
        let session_id = self.state.start_interaction(
            InteractionScenario::GestureControl,
            [ModalityType::Gesture, ModalityType::Gaze],
            self.settings.gesture_control_timeout,
            SessionMetadata {
                gesture: Some(gesture.to_string()),
                ..SessionMetadata::default()
            },
        );

        self.bus
            .publish(ModalityEvent::gesture(Gesture::from(gesture), confidence).with_session(session_id));
        session_id
    }

    // -------------------------------------------------------------------------
    // Responses
    // -------------------------------------------------------------------------

    fn send(&self, response: SystemResponse) {
        if let Err(e) = self.responder.deliver(&response) {
            warn!(response_type = %response.response_type, error = %e, "responder failed");
        }
        let mut history = self.history.lock();
        history.push_back(response);
        while history.len() > self.settings.response_history {
            history.pop_front();
        }
    }

    /// Response history, oldest first.
    pub fn responses(&self) -> Vec<SystemResponse> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn response_stats(&self) -> ResponseStats {
        self.response_stats_at(Utc::now())
    }

    pub fn response_stats_at(&self, now: DateTime<Utc>) -> ResponseStats {
        let recent_window = TimeDelta::seconds(RECENT_WINDOW_SECS);
        let history = self.history.lock();
        let mut stats = ResponseStats {
            total_responses: history.len(),
            ..ResponseStats::default()
        };
        for response in history.iter() {
            *stats
                .type_stats
                .entry(response.response_type.as_str().to_string())
                .or_default() += 1;
            let scenario = response
                .metadata
                .scenario
                .as_ref()
                .map_or("unknown", InteractionScenario::as_str);
            *stats.scenario_stats.entry(scenario.to_string()).or_default() += 1;
            if now.signed_duration_since(response.timestamp) < recent_window {
                stats.recent_responses += 1;
            }
        }
        stats
    }
}

impl Drop for ScenarioHandler {
    fn drop(&mut self) {
        for (event_type, id) in &self.subscriptions {
            self.bus.unsubscribe(*event_type, *id);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response templates
// ────────────────────────────────────────────────────────────────────────────

fn distraction_alert(gaze: GazeDirection, session_id: SessionId) -> Vec<SystemResponse> {
    let meta = || {
        let mut m = ResponseMetadata::new(ResponseKind::DistractionAlert);
        m.session_id = Some(session_id);
        m.scenario = Some(InteractionScenario::DistractionAlert);
        m
    };

    let mut text = meta();
    text.gaze = Some(gaze);
    let mut audio = meta();
    audio.voice_prompt = true;
    let mut visual = meta();
    visual.display_secs = Some(5.0);
    visual.priority = ResponsePriority::High;

    vec![
        SystemResponse::new(
            ResponseType::Text,
            format!("Your gaze drifted {gaze}. Please keep your eyes on the road!"),
            text,
        ),
        SystemResponse::new(
            ResponseType::Audio,
            "Please watch the road. Say 'eyes on the road' or give a thumbs up to confirm.",
            audio,
        ),
        SystemResponse::new(
            ResponseType::Visual,
            "⚠️ Distraction alert - return your attention to the road",
            visual,
        ),
    ]
}

fn acknowledgement(
    decision: &Intent,
    scenario: &InteractionScenario,
    session_id: Option<SessionId>,
) -> Vec<SystemResponse> {
    let (text, audio, visual) = if decision.is_affirmative() {
        (
            "Thanks for confirming. Stay focused on the road.",
            "Got it. Drive safely.",
            "✅ Attention confirmed",
        )
    } else {
        (
            "Please keep paying attention to the road.",
            "Stay focused.",
            "⚠️ Watch the road",
        )
    };

    let meta = || {
        let mut m = ResponseMetadata::new(ResponseKind::Acknowledgement);
        m.session_id = session_id;
        m.scenario = Some(scenario.clone());
        m.decision = Some(decision.clone());
        m
    };
    let mut visual_meta = meta();
    visual_meta.display_secs = Some(3.0);

    vec![
        SystemResponse::new(ResponseType::Text, text, meta()),
        SystemResponse::new(ResponseType::Audio, audio, meta()),
        SystemResponse::new(ResponseType::Visual, visual, visual_meta),
    ]
}

fn timeout_reminder(session_id: SessionId, scenario: Option<InteractionScenario>) -> Vec<SystemResponse> {
    let meta = || {
        let mut m = ResponseMetadata::new(ResponseKind::TimeoutReminder);
        m.session_id = Some(session_id);
        m.scenario = scenario.clone();
        m
    };
    let mut audio = meta();
    audio.voice_prompt = true;

    vec![
        SystemResponse::new(ResponseType::Text, "Still waiting for your confirmation.", meta()),
        SystemResponse::new(
            ResponseType::Audio,
            "Please confirm that you are watching the road.",
            audio,
        ),
        SystemResponse::new(ResponseType::Visual, "⏰ Waiting for confirmation...", meta()),
    ]
}
