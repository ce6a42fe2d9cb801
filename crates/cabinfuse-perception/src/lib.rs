//! `cabinfuse-perception` – Multimodal Fusion layer.
//!
//! Turns gaze, gesture, speech and head-pose events into a single decision
//! about what the driver wants.
//!
//! # Modules
//!
//! - [`rules`] – [`FusionRule`][rules::FusionRule]: per-scenario modality
//!   requirements, time window, weights and strategy.
//! - [`intent`] – [`extract_intent`][intent::extract_intent]: maps one event
//!   onto the shared [`Intent`][cabinfuse_types::Intent] vocabulary.
//! - [`strategy`] – [`fuse`][strategy::fuse]: the four fusion strategies
//!   (confidence-weighted, priority-based, majority vote, time window).
//! - [`engine`] – [`FusionEngine`][engine::FusionEngine]: bus subscriber that
//!   opens distraction sessions, feeds the session store and acts on fused
//!   decisions.

pub mod engine;
pub mod intent;
pub mod rules;
pub mod strategy;

pub use engine::{EngineSettings, FusionEngine, FusionLogEntry, FusionStats};
pub use intent::extract_intent;
pub use rules::{ConflictResolution, FusionRule, FusionStrategy, default_rules};
pub use strategy::{FusionDetails, FusionOutcome, IntentScore, events_in_window, fuse};
