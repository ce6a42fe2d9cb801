//! Terminal responder – renders system responses in the REPL.

use cabinfuse_runtime::Responder;
use cabinfuse_types::{CabinError, ResponseKind, ResponsePriority, ResponseType, SystemResponse};
use colored::Colorize;

pub struct ConsoleResponder;

impl Responder for ConsoleResponder {
    fn deliver(&self, response: &SystemResponse) -> Result<(), CabinError> {
        let label = match response.response_type {
            ResponseType::Text => "📝 text  ".normal(),
            ResponseType::Audio => "🔊 audio ".blue(),
            ResponseType::Visual => "👁  visual".magenta(),
            ResponseType::Haptic => "📳 haptic".yellow(),
        };
        let content = match (response.metadata.kind, response.metadata.priority) {
            (_, ResponsePriority::High) => response.content.red().bold(),
            (ResponseKind::TimeoutReminder, _) => response.content.yellow(),
            (ResponseKind::Acknowledgement, _) => response.content.green(),
            _ => response.content.normal(),
        };
        // Responses can arrive from the timer thread while the prompt is up.
        println!("\r  {label}  {content}");
        Ok(())
    }
}
