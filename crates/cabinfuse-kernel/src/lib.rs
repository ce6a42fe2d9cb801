//! `cabinfuse-kernel` – Session State
//!
//! Owns the global interaction state and the single active interaction
//! session.  It does not interpret events; it records them and enforces the
//! session lifecycle.
//!
//! # Modules
//!
//! - [`session`] – [`InteractionSession`][session::InteractionSession] and
//!   its typed metadata, plus the read-only [`SessionInfo`][session::SessionInfo]
//!   and [`SessionStats`][session::SessionStats] views.
//! - [`state_manager`] – [`StateManager`][state_manager::StateManager]:
//!   the single writer for session mutations.  Starts, extends and ends
//!   sessions, detects timeouts lazily, and notifies state-change
//!   subscribers.

pub mod session;
pub mod state_manager;

pub use session::{InteractionSession, SessionInfo, SessionMetadata, SessionStats, SessionTrigger};
pub use state_manager::{DEFAULT_SESSION_HISTORY, StateCallback, StateManager, StateTransition};
