//! Maps a single perceptual event onto the normalised [`Intent`] vocabulary
//! that fusion strategies vote on.

use cabinfuse_types::{EventPayload, GazeDirection, Gesture, Intent, ModalityEvent};

/// Intent carried by `event`, or `None` when the event says nothing about
/// what the driver wants (raw speech, head pose, fusion output).
pub fn extract_intent(event: &ModalityEvent) -> Option<Intent> {
    match &event.payload {
        EventPayload::GestureDetected { gesture } => gesture_intent(gesture),
        EventPayload::GazeChanged { direction } => Some(gaze_intent(*direction)),
        EventPayload::IntentClassified { intent, .. } => Some(classifier_intent(intent)),
        _ => None,
    }
}

fn gesture_intent(gesture: &Gesture) -> Option<Intent> {
    match gesture {
        Gesture::ThumbsUp | Gesture::Ok => Some(Intent::Confirm),
        Gesture::ThumbsDown | Gesture::Stop => Some(Intent::Reject),
        Gesture::Wave => Some(Intent::Attention),
        Gesture::Other(_) => None,
    }
}

fn gaze_intent(direction: GazeDirection) -> Intent {
    if direction.is_deviation() {
        Intent::Distraction
    } else {
        Intent::Attention
    }
}

/// Classifier labels are normalised so that an explicit "eyes on the road"
/// utterance fuses as a confirmation.
fn classifier_intent(label: &str) -> Intent {
    match label {
        "attention_confirm" | "road_focus" => Intent::Confirm,
        "reject" | "busy" => Intent::Reject,
        other => Intent::from(other.to_string()),
    }
}
