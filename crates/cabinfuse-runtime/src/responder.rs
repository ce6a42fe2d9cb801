//! The outbound seam: where [`SystemResponse`]s leave the core.
//!
//! A real cockpit plugs in its TTS engine, UI and action handler here.

use cabinfuse_types::{CabinError, ResponseType, SystemResponse};
use tracing::info;

/// Renders responses on an output channel.
///
/// Called synchronously from bus handlers and from the reminder timer
/// thread, so implementations must be cheap and thread-safe.
pub trait Responder: Send + Sync {
    fn deliver(&self, response: &SystemResponse) -> Result<(), CabinError>;
}

/// Default responder: writes every response to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingResponder;

impl Responder for TracingResponder {
    fn deliver(&self, response: &SystemResponse) -> Result<(), CabinError> {
        let session = response
            .metadata
            .session_id
            .map(|id| id.short())
            .unwrap_or_default();
        match response.response_type {
            ResponseType::Audio => info!(session = %session, voice_prompt = response.metadata.voice_prompt, "🔊 {}", response.content),
            ResponseType::Visual => info!(session = %session, display_secs = ?response.metadata.display_secs, "👁 {}", response.content),
            ResponseType::Text => info!(session = %session, "📝 {}", response.content),
            ResponseType::Haptic => info!(session = %session, "📳 {}", response.content),
        }
        Ok(())
    }
}
