//! [`FusionEngine`] – turns perceptual events into session decisions.
//!
//! The engine subscribes to the five perceptual event types.  For every
//! event it:
//!
//! 1. opens a `distraction_alert` session when gaze leaves the road and no
//!    session is active, and announces it with `DISTRACTION_DETECTED`;
//! 2. appends the event to the current session;
//! 3. re-evaluates the session's [`FusionRule`] over the events inside the
//!    rule's time window and, on an affirmative decision, closes the session
//!    and publishes `ATTENTION_CONFIRMED` followed by
//!    `INTERACTION_COMPLETED`.
//!
//! Bus handlers hold only a weak reference to the engine; dropping the last
//! `Arc<FusionEngine>` unsubscribes it.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cabinfuse_kernel::{SessionMetadata, StateManager};
use cabinfuse_middleware::{EventBus, SubscriptionId};
use cabinfuse_types::{
    CabinError, EndReason, EventPayload, EventType, GazeDirection, Intent, InteractionScenario,
    ModalityEvent, ModalityType, SessionId,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::rules::{FusionRule, default_rules};
use crate::strategy::{FusionOutcome, events_in_window, fuse};

/// Tunables for [`FusionEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Timeout of sessions opened by a gaze deviation.
    pub distraction_timeout: Duration,
    /// Modalities a distraction session waits for.
    pub distraction_expected: Vec<ModalityType>,
    /// The fusion log is trimmed once it grows past this many entries...
    pub log_limit: usize,
    /// ...down to this many of the most recent ones.
    pub log_retain: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            distraction_timeout: Duration::from_secs(15),
            distraction_expected: vec![ModalityType::Audio, ModalityType::Gesture],
            log_limit: 1000,
            log_retain: 500,
        }
    }
}

/// One fusion attempt that passed the modality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionLogEntry {
    pub session_id: SessionId,
    pub scenario: InteractionScenario,
    pub outcome: FusionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionStats {
    pub total_fusions: usize,
    /// Attempts that produced any decision.
    pub successful_fusions: usize,
    pub success_rate: f64,
    pub scenario_stats: BTreeMap<String, usize>,
    pub strategy_stats: BTreeMap<String, usize>,
}

pub struct FusionEngine {
    bus: EventBus,
    state: Arc<StateManager>,
    rules: RwLock<HashMap<InteractionScenario, FusionRule>>,
    log: Mutex<VecDeque<FusionLogEntry>>,
    settings: EngineSettings,
    subscriptions: Vec<(EventType, SubscriptionId)>,
}

impl FusionEngine {
    /// Build an engine seeded with the built-in rules and subscribe it to
    /// `bus`.
    pub fn new(bus: EventBus, state: Arc<StateManager>, settings: EngineSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<FusionEngine>| {
            let subscriptions = EventType::ALL
                .into_iter()
                .filter(EventType::is_perceptual)
                .map(|event_type| {
                    let weak = Weak::clone(weak);
                    let id = bus.subscribe(event_type, move |event| match weak.upgrade() {
                        Some(engine) => engine.handle_event(event),
                        None => Ok(()),
                    });
                    (event_type, id)
                })
                .collect();

            FusionEngine {
                bus: bus.clone(),
                state,
                rules: RwLock::new(default_rules()),
                log: Mutex::new(VecDeque::new()),
                settings,
                subscriptions,
            }
        })
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    /// Add or replace the rule for `rule.scenario`, returning the previous one.
    pub fn register_rule(&self, rule: FusionRule) -> Option<FusionRule> {
        info!(scenario = %rule.scenario, strategy = %rule.strategy, "fusion rule registered");
        self.rules.write().insert(rule.scenario.clone(), rule)
    }

    pub fn rule(&self, scenario: &InteractionScenario) -> Option<FusionRule> {
        self.rules.read().get(scenario).cloned()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    // -------------------------------------------------------------------------
    // Event handling
    // -------------------------------------------------------------------------

    /// Entry point for every perceptual event delivered by the bus.
    pub fn handle_event(&self, event: &Arc<ModalityEvent>) -> Result<(), CabinError> {
        if let EventPayload::GazeChanged { direction } = &event.payload {
            if direction.is_deviation() {
                self.trigger_distraction(event, *direction);
            }
        }

        if !self.state.add_event_to_session(Arc::clone(event)) {
            debug!(event_type = %event.event_type(), "event not attached to a session");
        }
        self.check_fusion_completion();
        Ok(())
    }

    fn trigger_distraction(&self, trigger: &ModalityEvent, gaze: GazeDirection) {
        let Some(session_id) = self.state.start_interaction_if_idle(
            InteractionScenario::DistractionAlert,
            self.settings.distraction_expected.iter().copied(),
            self.settings.distraction_timeout,
            SessionMetadata::triggered_by(trigger),
        ) else {
            return;
        };

        info!(session = %session_id.short(), gaze = %gaze, "distraction detected");
        let alert = ModalityEvent::new(
            ModalityType::Vision,
            EventPayload::DistractionDetected {
                reason: "gaze_deviation".to_string(),
                gaze,
                session_id,
            },
            trigger.confidence,
        )
        .with_session(session_id);
        self.bus.publish(alert);
    }

    // -------------------------------------------------------------------------
    // Fusion
    // -------------------------------------------------------------------------

    pub fn check_fusion_completion(&self) -> Option<FusionOutcome> {
        self.check_fusion_completion_at(Utc::now())
    }

    /// Evaluate the current session's rule as of `now`.
    ///
    /// Returns `None` when there is no session, no rule for its scenario, or
    /// the windowed events do not yet satisfy the rule's modality gate.
    #[instrument(level = "debug", skip(self))]
    pub fn check_fusion_completion_at(&self, now: DateTime<Utc>) -> Option<FusionOutcome> {
        let session = self.state.current_session()?;
        let Some(rule) = self.rule(&session.scenario) else {
            debug!(scenario = %session.scenario, "no fusion rule for scenario");
            return None;
        };

        let window = events_in_window(&session.received_events, rule.time_window, now);
        let received: BTreeSet<ModalityType> = window.iter().map(|e| e.modality).collect();
        if !rule.can_fuse(&received) {
            return None;
        }

        let outcome = fuse(&window, &rule, now);
        info!(
            session = %session.session_id.short(),
            scenario = %session.scenario,
            strategy = %outcome.strategy,
            decision = outcome.decision.as_ref().map(Intent::as_str).unwrap_or("none"),
            confidence = outcome.confidence,
            events = outcome.events_count,
            "fusion evaluated"
        );
        self.record(FusionLogEntry {
            session_id: session.session_id,
            scenario: session.scenario.clone(),
            outcome: outcome.clone(),
        });

        match &outcome.decision {
            Some(decision) if decision.is_affirmative() => {
                self.confirm_attention(session.session_id, &session.scenario, decision, &outcome);
            }
            Some(Intent::Reject) => {
                info!(session = %session.session_id.short(), "driver rejected; session stays open");
            }
            _ => {}
        }

        Some(outcome)
    }

    /// Ends the session before announcing it, so `ATTENTION_CONFIRMED`
    /// subscribers already see it in the history rather than as current.
    fn confirm_attention(
        &self,
        session_id: SessionId,
        scenario: &InteractionScenario,
        decision: &Intent,
        outcome: &FusionOutcome,
    ) {
        // Another thread may have fused the same session first.
        if !self
            .state
            .end_session_if_current(session_id, EndReason::AttentionConfirmed)
        {
            return;
        }

        self.bus.publish(
            ModalityEvent::new(
                ModalityType::Vision,
                EventPayload::AttentionConfirmed {
                    scenario: scenario.clone(),
                    decision: decision.clone(),
                    confidence: outcome.confidence,
                    modalities: outcome.modalities.clone(),
                },
                outcome.confidence,
            )
            .with_session(session_id),
        );
        self.bus.publish(
            ModalityEvent::new(
                ModalityType::Vision,
                EventPayload::InteractionCompleted {
                    scenario: scenario.clone(),
                    decision: Some(decision.clone()),
                },
                outcome.confidence,
            )
            .with_session(session_id),
        );
    }

    // -------------------------------------------------------------------------
    // Log & statistics
    // -------------------------------------------------------------------------

    fn record(&self, entry: FusionLogEntry) {
        let mut log = self.log.lock();
        log.push_back(entry);
        if log.len() > self.settings.log_limit {
            let excess = log.len().saturating_sub(self.settings.log_retain);
            log.drain(..excess);
        }
    }

    /// Recorded fusion attempts, oldest first.
    pub fn fusion_log(&self) -> Vec<FusionLogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn fusion_stats(&self) -> FusionStats {
        let log = self.log.lock();
        if log.is_empty() {
            return FusionStats::default();
        }

        let mut stats = FusionStats {
            total_fusions: log.len(),
            ..FusionStats::default()
        };
        for entry in log.iter() {
            if entry.outcome.decision.is_some() {
                stats.successful_fusions += 1;
            }
            *stats
                .scenario_stats
                .entry(entry.scenario.as_str().to_string())
                .or_default() += 1;
            *stats
                .strategy_stats
                .entry(entry.outcome.strategy.as_str().to_string())
                .or_default() += 1;
        }
        stats.success_rate = stats.successful_fusions as f64 / stats.total_fusions as f64;
        stats
    }
}

impl Drop for FusionEngine {
    fn drop(&mut self) {
        for (event_type, id) in &self.subscriptions {
            self.bus.unsubscribe(*event_type, *id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ConflictResolution, FusionStrategy};
    use cabinfuse_types::SystemState;
    use chrono::TimeDelta;

    struct Harness {
        bus: EventBus,
        state: Arc<StateManager>,
        engine: Arc<FusionEngine>,
    }

    fn harness(settings: EngineSettings) -> Harness {
        let bus = EventBus::default();
        let state = Arc::new(StateManager::default());
        let engine = FusionEngine::new(bus.clone(), Arc::clone(&state), settings);
        Harness { bus, state, engine }
    }

    fn published(bus: &EventBus, event_type: EventType) -> Vec<Arc<ModalityEvent>> {
        bus.recent_events(Some(event_type), None, Duration::from_secs(60))
    }

    #[test]
    fn gaze_deviation_opens_distraction_session() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));

        let session = h.state.current_session().expect("session opened");
        assert_eq!(session.scenario, InteractionScenario::DistractionAlert);
        assert_eq!(session.timeout, Duration::from_secs(15));
        assert_eq!(
            session.expected_modalities,
            BTreeSet::from([ModalityType::Audio, ModalityType::Gesture])
        );
        assert_eq!(session.received_events.len(), 1);

        let alerts = published(&h.bus, EventType::DistractionDetected);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].session_id, Some(session.session_id));
        assert!((alerts[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn centered_gaze_does_not_open_session() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Center, 0.9));
        assert!(h.state.current_session().is_none());
    }

    #[test]
    fn repeated_deviation_keeps_one_session() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        let first = h.state.current_session_id();
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Right, 0.9));
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Down, 0.9));

        assert_eq!(h.state.current_session_id(), first);
        assert_eq!(h.state.current_session().unwrap().received_events.len(), 3);
        assert_eq!(published(&h.bus, EventType::DistractionDetected).len(), 1);
    }

    #[test]
    fn confirmation_closes_session_and_announces_it() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        let id = h.state.current_session_id().unwrap();
        h.bus.publish(ModalityEvent::intent("attention_confirm", 0.8));
        h.bus.publish(ModalityEvent::gesture("thumbs_up", 0.8));

        assert_eq!(h.state.current_state(), SystemState::Idle);
        let ended = &h.state.session_history()[0];
        assert_eq!(ended.session_id, id);
        assert_eq!(ended.end_reason(), Some(&EndReason::AttentionConfirmed));

        let confirmed = published(&h.bus, EventType::AttentionConfirmed);
        assert_eq!(confirmed.len(), 1);
        match &confirmed[0].payload {
            EventPayload::AttentionConfirmed { decision, .. } => {
                assert!(decision.is_affirmative())
            }
            other => panic!("unexpected payload {other:?}"),
        }
        let completed = published(&h.bus, EventType::InteractionCompleted);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].session_id, Some(id));
    }

    #[test]
    fn session_is_closed_before_confirmation_is_announced() {
        let h = harness(EngineSettings::default());
        let seen = Arc::new(Mutex::new(None));
        let (state, slot) = (Arc::clone(&h.state), Arc::clone(&seen));
        h.bus.subscribe(EventType::AttentionConfirmed, move |_| {
            *slot.lock() = Some((state.current_state(), state.session_history().len()));
            Ok(())
        });

        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        h.bus.publish(ModalityEvent::gesture("thumbs_up", 0.9));
        assert_eq!(*seen.lock(), Some((SystemState::Idle, 1)));
    }

    #[test]
    fn audio_outranks_gesture_in_distraction_alert() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Right, 0.9));
        // Same window, conflicting answers: audio confirms, gesture rejects.
        let now = Utc::now();
        h.state
            .add_event_to_session(Arc::new(ModalityEvent::gesture("thumbs_down", 0.7)));
        h.state
            .add_event_to_session(Arc::new(ModalityEvent::intent("attention_confirm", 0.8)));

        let outcome = h.engine.check_fusion_completion_at(now).unwrap();
        assert_eq!(outcome.decision, Some(Intent::Confirm));
        assert_eq!(outcome.conflict_resolution, ConflictResolution::ModalityPriority);
        assert!(outcome.conflicts.contains(&Intent::Reject));
        assert_eq!(h.state.current_state(), SystemState::Idle);
    }

    #[test]
    fn rejection_keeps_session_open() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        let id = h.state.current_session_id();
        h.bus.publish(ModalityEvent::gesture("stop", 0.9));

        assert_eq!(h.state.current_session_id(), id);
        assert_eq!(h.state.current_state(), SystemState::WaitingResponse);
        assert!(published(&h.bus, EventType::AttentionConfirmed).is_empty());
        assert_eq!(h.engine.fusion_stats().successful_fusions, 1);
    }

    #[test]
    fn stale_events_are_outside_the_window() {
        let h = harness(EngineSettings::default());
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        let stale = ModalityEvent::gesture("ok", 0.9).at(Utc::now() - TimeDelta::seconds(11));
        h.bus.publish(stale);

        assert_eq!(h.state.current_state(), SystemState::WaitingResponse);
        assert_eq!(h.state.current_session().unwrap().received_events.len(), 2);
        assert!(h.engine.fusion_log().is_empty());
    }

    #[test]
    fn scenario_without_rule_waits() {
        let h = harness(EngineSettings::default());
        h.state.start_interaction(
            InteractionScenario::Custom("parking_assist".into()),
            [ModalityType::Gesture],
            Duration::from_secs(10),
            SessionMetadata::default(),
        );
        h.bus.publish(ModalityEvent::gesture("ok", 0.9));
        assert!(h.engine.check_fusion_completion().is_none());
        assert_eq!(h.state.current_state(), SystemState::WaitingResponse);
    }

    #[test]
    fn registered_rule_is_used() {
        let h = harness(EngineSettings::default());
        let scenario = InteractionScenario::Custom("parking_assist".into());
        let previous = h.engine.register_rule(FusionRule {
            scenario: scenario.clone(),
            required_modalities: [ModalityType::Gesture].into(),
            optional_modalities: BTreeSet::new(),
            time_window: Duration::from_secs(5),
            strategy: FusionStrategy::TimeWindow,
            conflict_resolution: ConflictResolution::TemporalOrder,
            modality_weights: BTreeMap::new(),
            priority_order: vec![ModalityType::Gesture],
        });
        assert!(previous.is_none());
        assert_eq!(h.engine.rule_count(), 4);

        h.state.start_interaction(
            scenario,
            [ModalityType::Gesture],
            Duration::from_secs(10),
            SessionMetadata::default(),
        );
        h.bus.publish(ModalityEvent::gesture("wave", 0.7));
        assert_eq!(h.state.current_state(), SystemState::Idle);
        assert_eq!(
            h.engine.fusion_stats().strategy_stats.get("time_window"),
            Some(&1)
        );
    }

    #[test]
    fn fusion_log_is_trimmed() {
        let h = harness(EngineSettings {
            log_limit: 4,
            log_retain: 2,
            ..EngineSettings::default()
        });
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        for _ in 0..5 {
            h.bus.publish(ModalityEvent::gesture("stop", 0.9));
        }
        assert_eq!(h.engine.fusion_log().len(), 2);
    }

    #[test]
    fn stats_group_by_scenario_and_strategy() {
        let h = harness(EngineSettings::default());
        assert_eq!(h.engine.fusion_stats(), FusionStats::default());

        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        h.bus.publish(ModalityEvent::gesture("stop", 0.9));
        h.bus.publish(ModalityEvent::gesture("ok", 0.9));

        let stats = h.engine.fusion_stats();
        assert_eq!(stats.total_fusions, 2);
        assert_eq!(stats.successful_fusions, 2);
        assert!((stats.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(stats.scenario_stats.get("distraction_alert"), Some(&2));
        assert_eq!(stats.strategy_stats.get("priority_based"), Some(&2));
    }

    #[test]
    fn dropping_engine_unsubscribes() {
        let h = harness(EngineSettings::default());
        assert_eq!(h.bus.subscriber_count(), 5);
        drop(h.engine);
        assert_eq!(h.bus.subscriber_count(), 0);
        h.bus.publish(ModalityEvent::gaze(GazeDirection::Left, 0.9));
        assert!(h.state.current_session().is_none());
    }
}
