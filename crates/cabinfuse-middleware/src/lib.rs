//! `cabinfuse-middleware` – the nervous system of the cockpit.
//!
//! Routes perceptual events between producers, the fusion engine and the
//! scenario handler without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, synchronous publish/subscribe [`EventBus`] with a
//!   bounded event history.

pub mod bus;

pub use bus::{DEFAULT_HISTORY_CAPACITY, EventBus, EventHandler, SubscriptionId};
