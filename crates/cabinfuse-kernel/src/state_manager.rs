//! [`StateManager`] – owner of the global interaction state and the single
//! active [`InteractionSession`].
//!
//! # State machine
//!
//! ```text
//! IDLE ─start_interaction─▶ WAITING_RESPONSE ─end_current_session─▶ IDLE
//! ```
//!
//! `MONITORING`, `DISTRACTION_DETECTED`, `PROCESSING_RESPONSE` and
//! `INTERACTION_COMPLETE` are reachable through [`StateManager::change_state`]
//! but no built-in rule drives them.
//!
//! # Single writer
//!
//! Producers publish on their own threads and the bus dispatches
//! synchronously, so session mutations arrive concurrently.  One mutex guards
//! the current session, the state and the history; at most one session is
//! current at any instant.  Starting a session force-ends the previous one
//! with [`EndReason::NewSessionStarted`].
//!
//! State-change callbacks are invoked after the lock has been released so
//! they may call back into the manager.
//!
//! # Expiry
//!
//! Expiry is lazy: [`StateManager::add_event_to_session`] detects an expired
//! session, ends it with [`EndReason::Timeout`] and rejects the event.  There
//! is no background sweep.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use cabinfuse_types::{EndReason, InteractionScenario, ModalityEvent, ModalityType, SessionId, SystemState};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::session::{InteractionSession, SessionInfo, SessionMetadata, SessionStats};

/// Default number of ended sessions retained for statistics.
pub const DEFAULT_SESSION_HISTORY: usize = 100;

/// Callback fired when the manager enters a subscribed [`SystemState`].
pub type StateCallback = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Describes one state change, including the session that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub from: SystemState,
    pub to: SystemState,
    pub session_id: Option<SessionId>,
    pub scenario: Option<InteractionScenario>,
    pub expected_modalities: Vec<ModalityType>,
    /// Set when the transition was caused by a session ending.
    pub end_reason: Option<EndReason>,
}

struct Inner {
    state: SystemState,
    current: Option<InteractionSession>,
    history: VecDeque<InteractionSession>,
}

pub struct StateManager {
    inner: Mutex<Inner>,
    callbacks: RwLock<HashMap<SystemState, Vec<StateCallback>>>,
    history_capacity: usize,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_HISTORY)
    }
}

impl StateManager {
    /// Create a manager in [`SystemState::Idle`] that keeps at most
    /// `history_capacity` ended sessions.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SystemState::Idle,
                current: None,
                history: VecDeque::new(),
            }),
            callbacks: RwLock::new(HashMap::new()),
            history_capacity: history_capacity.max(1),
        }
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Register `callback` to run every time the manager enters `state`.
    pub fn subscribe_state_change<F>(&self, state: SystemState, callback: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .entry(state)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn current_state(&self) -> SystemState {
        self.inner.lock().state
    }

    /// Snapshot of the active session (events are shared, not copied).
    pub fn current_session(&self) -> Option<InteractionSession> {
        self.inner.lock().current.clone()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.inner.lock().current.as_ref().map(|s| s.session_id)
    }

    pub fn current_session_info(&self) -> Option<SessionInfo> {
        let now = Utc::now();
        self.inner.lock().current.as_ref().map(|s| s.info_at(now))
    }

    /// `true` when `session_id` is still the active session and the manager
    /// is still waiting for the driver's response.  Evaluated atomically.
    pub fn is_awaiting_response(&self, session_id: SessionId) -> bool {
        let inner = self.inner.lock();
        inner.state == SystemState::WaitingResponse
            && inner.current.as_ref().is_some_and(|s| s.session_id == session_id)
    }

    /// Ended sessions, oldest first.
    pub fn session_history(&self) -> Vec<InteractionSession> {
        self.inner.lock().history.iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Session lifecycle
    // -------------------------------------------------------------------------

    /// Open a new session for `scenario`, ending any active one first.
    pub fn start_interaction(
        &self,
        scenario: InteractionScenario,
        expected_modalities: impl IntoIterator<Item = ModalityType>,
        timeout: Duration,
        metadata: SessionMetadata,
    ) -> SessionId {
        let expected: BTreeSet<ModalityType> = expected_modalities.into_iter().collect();
        let (session_id, transitions) = {
            let mut inner = self.inner.lock();
            self.start_locked(&mut inner, scenario, expected, timeout, metadata, Utc::now())
        };
        self.notify(&transitions);
        session_id
    }

    /// Open a new session only if none is active.
    ///
    /// The check and the start happen under one lock acquisition, so racing
    /// producers cannot both open a session.  Returns `None` when a session
    /// was already active.
    pub fn start_interaction_if_idle(
        &self,
        scenario: InteractionScenario,
        expected_modalities: impl IntoIterator<Item = ModalityType>,
        timeout: Duration,
        metadata: SessionMetadata,
    ) -> Option<SessionId> {
        let expected: BTreeSet<ModalityType> = expected_modalities.into_iter().collect();
        let (session_id, transitions) = {
            let mut inner = self.inner.lock();
            if inner.current.is_some() {
                return None;
            }
            self.start_locked(&mut inner, scenario, expected, timeout, metadata, Utc::now())
        };
        self.notify(&transitions);
        Some(session_id)
    }

    /// Append `event` to the active session.
    ///
    /// Returns `false` without storing the event when no session is active,
    /// or when the active session has expired – in which case it is ended
    /// with [`EndReason::Timeout`].
    pub fn add_event_to_session(&self, event: Arc<ModalityEvent>) -> bool {
        self.add_event_to_session_at(event, Utc::now())
    }

    /// [`add_event_to_session`][Self::add_event_to_session] evaluated at an
    /// explicit `now`.
    pub fn add_event_to_session_at(&self, event: Arc<ModalityEvent>, now: DateTime<Utc>) -> bool {
        let (accepted, transitions) = {
            let mut inner = self.inner.lock();
            let expired = inner.current.as_ref().map(|s| s.is_expired_at(now));
            match expired {
                None => (false, Vec::new()),
                Some(true) => {
                    debug!("session expired before event arrived");
                    let transitions = self.end_locked(&mut inner, EndReason::Timeout, now);
                    (false, transitions)
                }
                Some(false) => {
                    let Some(session) = inner.current.as_mut() else {
                        return false;
                    };
                    debug!(
                        session = %session.session_id.short(),
                        modality = %event.modality,
                        event_type = %event.event_type(),
                        "event added to session"
                    );
                    session.received_events.push(event);
                    (true, Vec::new())
                }
            }
        };
        self.notify(&transitions);
        accepted
    }

    /// End the active session with `reason`.  Returns `false` when there was
    /// nothing to end.
    pub fn end_current_session(&self, reason: EndReason) -> bool {
        let transitions = {
            let mut inner = self.inner.lock();
            self.end_locked(&mut inner, reason, Utc::now())
        };
        let ended = !transitions.is_empty();
        self.notify(&transitions);
        ended
    }

    /// End the active session only if it is still `session_id`.
    ///
    /// Lets a caller that decided on a snapshot close exactly that session
    /// and nothing newer.
    pub fn end_session_if_current(&self, session_id: SessionId, reason: EndReason) -> bool {
        let transitions = {
            let mut inner = self.inner.lock();
            if inner.current.as_ref().map(|s| s.session_id) != Some(session_id) {
                return false;
            }
            self.end_locked(&mut inner, reason, Utc::now())
        };
        self.notify(&transitions);
        true
    }

    /// Force the state machine into `state`, e.g. an extension entering
    /// `PROCESSING_RESPONSE`.  The active session, if any, follows along.
    pub fn change_state(&self, state: SystemState) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = state;
            let session = inner.current.as_mut();
            let (session_id, scenario, expected) = match session {
                Some(s) => {
                    s.state = state;
                    (
                        Some(s.session_id),
                        Some(s.scenario.clone()),
                        s.expected_modalities.iter().copied().collect(),
                    )
                }
                None => (None, None, Vec::new()),
            };
            StateTransition {
                from,
                to: state,
                session_id,
                scenario,
                expected_modalities: expected,
                end_reason: None,
            }
        };
        self.notify(&[transition]);
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn session_stats(&self) -> SessionStats {
        let inner = self.inner.lock();
        let total = inner.history.len();
        if total == 0 {
            return SessionStats::default();
        }

        let completed = inner
            .history
            .iter()
            .filter(|s| s.end_reason().is_some_and(EndReason::is_completion))
            .count();
        let timed_out = inner
            .history
            .iter()
            .filter(|s| s.end_reason() == Some(&EndReason::Timeout))
            .count();
        let total_secs: f64 = inner.history.iter().map(|s| s.duration().as_secs_f64()).sum();

        SessionStats {
            total_sessions: total,
            completed_sessions: completed,
            timeout_sessions: timed_out,
            completion_rate: completed as f64 / total as f64,
            avg_duration_secs: total_secs / total as f64,
        }
    }

    // -------------------------------------------------------------------------
    // Internal helpers (lock held by caller)
    // -------------------------------------------------------------------------

    fn start_locked(
        &self,
        inner: &mut Inner,
        scenario: InteractionScenario,
        expected: BTreeSet<ModalityType>,
        timeout: Duration,
        metadata: SessionMetadata,
        now: DateTime<Utc>,
    ) -> (SessionId, Vec<StateTransition>) {
        let mut transitions = self.end_locked(inner, EndReason::NewSessionStarted, now);

        let session = InteractionSession::new(scenario, expected, timeout, metadata, now);
        let session_id = session.session_id;
        info!(
            session = %session_id.short(),
            scenario = %session.scenario,
            timeout_secs = timeout.as_secs_f64(),
            "interaction session started"
        );

        let from = inner.state;
        inner.state = SystemState::WaitingResponse;
        transitions.push(StateTransition {
            from,
            to: SystemState::WaitingResponse,
            session_id: Some(session_id),
            scenario: Some(session.scenario.clone()),
            expected_modalities: session.expected_modalities.iter().copied().collect(),
            end_reason: None,
        });
        inner.current = Some(session);

        (session_id, transitions)
    }

    fn end_locked(&self, inner: &mut Inner, reason: EndReason, now: DateTime<Utc>) -> Vec<StateTransition> {
        let Some(mut session) = inner.current.take() else {
            return Vec::new();
        };

        let duration = session.age_at(now);
        session.metadata.end_reason = Some(reason.clone());
        session.metadata.duration = Some(duration);
        info!(
            session = %session.session_id.short(),
            scenario = %session.scenario,
            reason = %reason,
            duration_secs = duration.as_secs_f64(),
            "interaction session ended"
        );

        let transition = StateTransition {
            from: inner.state,
            to: SystemState::Idle,
            session_id: Some(session.session_id),
            scenario: Some(session.scenario.clone()),
            expected_modalities: session.expected_modalities.iter().copied().collect(),
            end_reason: Some(reason),
        };

        inner.history.push_back(session);
        while inner.history.len() > self.history_capacity {
            inner.history.pop_front();
        }
        inner.state = SystemState::Idle;

        vec![transition]
    }

    fn notify(&self, transitions: &[StateTransition]) {
        for transition in transitions {
            debug!(from = %transition.from, to = %transition.to, "state transition");
            let callbacks: Vec<StateCallback> = self
                .callbacks
                .read()
                .get(&transition.to)
                .cloned()
                .unwrap_or_default();
            for callback in callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(transition))).is_err() {
                    error!(to = %transition.to, "state-change callback panicked");
                }
            }
        }
    }
}
