//! [`FusionSystem`] – the composition root.
//!
//! Builds the bus, the state manager, the fusion engine and the scenario
//! handler from one [`FusionConfig`] and wires them together.  There are no
//! global instances; embedders hold a `FusionSystem` and publish into it.
//!
//! ```rust,no_run
//! use cabinfuse_runtime::{FusionConfig, FusionSystem};
//! use cabinfuse_types::{GazeDirection, ModalityEvent};
//!
//! let system = FusionSystem::new(FusionConfig::default()).unwrap();
//! system.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
//! system.publish(ModalityEvent::gesture("thumbs_up", 0.8));
//! println!("{}", serde_json::to_string_pretty(&system.system_status()).unwrap());
//! ```

use std::sync::Arc;
use std::time::Duration;

use cabinfuse_kernel::{SessionInfo, SessionStats, StateManager};
use cabinfuse_middleware::EventBus;
use cabinfuse_perception::{EngineSettings, FusionEngine, FusionStats};
use cabinfuse_types::{
    CabinError, EndReason, EventPayload, ModalityEvent, ModalityType, SystemState,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::responder::{Responder, TracingResponder};
use crate::scenario::{ResponseStats, ScenarioHandler, ScenarioSettings};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Capacities and timings of the fusion stack.  Every field has a default,
/// so partial TOML/JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub bus_capacity: usize,
    pub session_history: usize,
    pub response_history: usize,
    pub fusion_log_limit: usize,
    pub fusion_log_retain: usize,
    pub reminder_delay_secs: f64,
    pub distraction_timeout_secs: f64,
    pub voice_command_timeout_secs: f64,
    pub gesture_control_timeout_secs: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 1000,
            session_history: 100,
            response_history: 500,
            fusion_log_limit: 1000,
            fusion_log_retain: 500,
            reminder_delay_secs: 8.0,
            distraction_timeout_secs: 15.0,
            voice_command_timeout_secs: 8.0,
            gesture_control_timeout_secs: 5.0,
        }
    }
}

impl FusionConfig {
    /// Reject zero capacities, a retain size above the log limit, and
    /// negative or non-finite durations.
    pub fn validate(&self) -> Result<(), CabinError> {
        for (name, value) in [
            ("bus_capacity", self.bus_capacity),
            ("session_history", self.session_history),
            ("response_history", self.response_history),
            ("fusion_log_limit", self.fusion_log_limit),
        ] {
            if value == 0 {
                return Err(CabinError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.fusion_log_retain > self.fusion_log_limit {
            return Err(CabinError::Config(format!(
                "fusion_log_retain ({}) exceeds fusion_log_limit ({})",
                self.fusion_log_retain, self.fusion_log_limit
            )));
        }
        self.durations().map(|_| ())
    }

    fn durations(&self) -> Result<[Duration; 4], CabinError> {
        Ok([
            secs("reminder_delay_secs", self.reminder_delay_secs)?,
            secs("distraction_timeout_secs", self.distraction_timeout_secs)?,
            secs("voice_command_timeout_secs", self.voice_command_timeout_secs)?,
            secs("gesture_control_timeout_secs", self.gesture_control_timeout_secs)?,
        ])
    }
}

fn secs(name: &str, value: f64) -> Result<Duration, CabinError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| CabinError::Config(format!("{name} = {value}: {e}")))
}

// ────────────────────────────────────────────────────────────────────────────
// Status snapshot
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStatus {
    pub subscribers: usize,
    pub history_len: usize,
    pub capacity: usize,
}

/// Everything a dashboard needs in one serialisable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub state: SystemState,
    pub current_session: Option<SessionInfo>,
    pub session_stats: SessionStats,
    pub fusion_stats: FusionStats,
    pub response_stats: ResponseStats,
    pub bus: BusStatus,
    pub pending_reminders: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// System
// ────────────────────────────────────────────────────────────────────────────

pub struct FusionSystem {
    config: FusionConfig,
    bus: EventBus,
    state: Arc<StateManager>,
    engine: Arc<FusionEngine>,
    scenarios: Arc<ScenarioHandler>,
}

impl FusionSystem {
    /// Build a system that logs responses through `tracing`.
    pub fn new(config: FusionConfig) -> Result<Self, CabinError> {
        Self::with_responder(config, Arc::new(TracingResponder))
    }

    pub fn with_responder(config: FusionConfig, responder: Arc<dyn Responder>) -> Result<Self, CabinError> {
        config.validate()?;
        let [reminder_delay, distraction_timeout, voice_command_timeout, gesture_control_timeout] =
            config.durations()?;

        let bus = EventBus::new(config.bus_capacity);
        let state = Arc::new(StateManager::new(config.session_history));
        announce_lifecycle(&bus, &state);

        let engine = FusionEngine::new(
            bus.clone(),
            Arc::clone(&state),
            EngineSettings {
                distraction_timeout,
                log_limit: config.fusion_log_limit,
                log_retain: config.fusion_log_retain,
                ..EngineSettings::default()
            },
        );
        let scenarios = ScenarioHandler::new(
            bus.clone(),
            Arc::clone(&state),
            responder,
            ScenarioSettings {
                reminder_delay,
                voice_command_timeout,
                gesture_control_timeout,
                response_history: config.response_history,
            },
        )?;

        info!(
            bus_capacity = config.bus_capacity,
            rules = engine.rule_count(),
            reminder_delay_secs = config.reminder_delay_secs,
            "fusion system ready"
        );

        Ok(Self {
            config,
            bus,
            state,
            engine,
            scenarios,
        })
    }

    /// Publish a producer event; returns the number of handlers that
    /// accepted it.
    pub fn publish(&self, event: ModalityEvent) -> usize {
        self.bus.publish(event)
    }

    /// End the active session with `reason`, if any.
    pub fn end_session(&self, reason: EndReason) -> bool {
        self.state.end_current_session(reason)
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            state: self.state.current_state(),
            current_session: self.state.current_session_info(),
            session_stats: self.state.session_stats(),
            fusion_stats: self.engine.fusion_stats(),
            response_stats: self.scenarios.response_stats(),
            bus: BusStatus {
                subscribers: self.bus.subscriber_count(),
                history_len: self.bus.history_len(),
                capacity: self.bus.capacity(),
            },
            pending_reminders: self.scenarios.pending_reminders(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn engine(&self) -> &Arc<FusionEngine> {
        &self.engine
    }

    pub fn scenarios(&self) -> &Arc<ScenarioHandler> {
        &self.scenarios
    }
}

/// Mirror session lifecycle transitions onto the bus as
/// `SCENARIO_STARTED` / `SCENARIO_ENDED`.
fn announce_lifecycle(bus: &EventBus, state: &StateManager) {
    let started = bus.clone();
    state.subscribe_state_change(SystemState::WaitingResponse, move |t| {
        let (Some(session_id), Some(scenario)) = (t.session_id, t.scenario.clone()) else {
            return;
        };
        started.publish(
            ModalityEvent::new(ModalityType::Vision, EventPayload::ScenarioStarted { scenario }, 1.0)
                .with_session(session_id),
        );
    });

    let ended = bus.clone();
    state.subscribe_state_change(SystemState::Idle, move |t| {
        let (Some(session_id), Some(scenario), Some(reason)) =
            (t.session_id, t.scenario.clone(), t.end_reason.clone())
        else {
            return;
        };
        ended.publish(
            ModalityEvent::new(
                ModalityType::Vision,
                EventPayload::ScenarioEnded { scenario, reason },
                1.0,
            )
            .with_session(session_id),
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FusionConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let zero_bus = FusionConfig {
            bus_capacity: 0,
            ..FusionConfig::default()
        };
        assert!(matches!(zero_bus.validate(), Err(CabinError::Config(_))));

        let negative = FusionConfig {
            reminder_delay_secs: -1.0,
            ..FusionConfig::default()
        };
        assert!(negative.validate().is_err());

        let retain = FusionConfig {
            fusion_log_limit: 10,
            fusion_log_retain: 20,
            ..FusionConfig::default()
        };
        assert!(retain.validate().is_err());
        assert!(FusionSystem::new(retain).is_err());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: FusionConfig = serde_json::from_str(r#"{"reminder_delay_secs": 2.5}"#).unwrap();
        assert_eq!(config.reminder_delay_secs, 2.5);
        assert_eq!(config.bus_capacity, 1000);
    }

    #[test]
    fn status_snapshot_serializes() {
        let system = FusionSystem::new(FusionConfig::default()).unwrap();
        let status = system.system_status();
        assert_eq!(status.state, SystemState::Idle);
        assert!(status.current_session.is_none());
        assert_eq!(status.bus.capacity, 1000);
        // Engine: five perceptual types.  Scenario handler: three outputs.
        assert_eq!(status.bus.subscribers, 8);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "idle");
    }
}
