//! `cabinfuse-runtime` – Scenarios, responses and system wiring.
//!
//! Where fused decisions become something the driver sees and hears.
//!
//! # Modules
//!
//! - [`system`] – [`FusionSystem`][system::FusionSystem]: builds and owns the
//!   bus, state manager, fusion engine and scenario handler from a single
//!   [`FusionConfig`][system::FusionConfig], and exposes the
//!   [`SystemStatus`][system::SystemStatus] snapshot.
//! - [`scenario`] – [`ScenarioHandler`][scenario::ScenarioHandler]:
//!   distraction alerts, acknowledgements and timeout reminders, plus the
//!   voice-command and gesture-control scenario triggers.
//! - [`reminder`] – [`ReminderScheduler`][reminder::ReminderScheduler]:
//!   cancellable per-session timers on a dedicated single-worker Tokio
//!   runtime.
//! - [`responder`] – the [`Responder`][responder::Responder] output seam and
//!   the default [`TracingResponder`][responder::TracingResponder].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber with an optional OTLP span
//!   exporter.

pub mod reminder;
pub mod responder;
pub mod scenario;
pub mod system;
pub mod telemetry;

pub use reminder::ReminderScheduler;
pub use responder::{Responder, TracingResponder};
pub use scenario::{ResponseStats, ScenarioHandler, ScenarioSettings};
pub use system::{BusStatus, FusionConfig, FusionSystem, SystemStatus};
