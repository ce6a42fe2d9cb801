//! Fusion strategies.
//!
//! Each strategy reduces the events of one fusion window to at most one
//! [`Intent`] plus a confidence in `[0, 1]`.  Every tie is broken in favour
//! of whatever was seen first, so the same window always fuses to the same
//! decision.
//!
//! | Strategy | Decision | Confidence |
//! |---|---|---|
//! | confidence-weighted | arg-max of Σ weight × confidence per label | normalised score |
//! | priority-based | first modality in priority order whose strongest event yields an intent | that event's confidence |
//! | majority vote | label with most events | votes / events in window |
//! | time window | most recent intent-bearing event | its confidence |

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cabinfuse_types::{Intent, ModalityEvent, ModalityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intent::extract_intent;
use crate::rules::{ConflictResolution, FusionRule, FusionStrategy};

// ────────────────────────────────────────────────────────────────────────────
// Outcome
// ────────────────────────────────────────────────────────────────────────────

/// Per-label score reported by the scoring strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub intent: Intent,
    pub score: f64,
}

/// Strategy-specific explanation of how a decision was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionDetails {
    /// No event in the window carried an intent.
    Undecided,
    Weighted {
        scores: Vec<IntentScore>,
        total_weight: f64,
    },
    Priority {
        selected_modality: ModalityType,
        selected_event: Uuid,
    },
    Votes {
        /// Vote count per label, in first-seen order.
        votes: Vec<IntentScore>,
        vote_count: usize,
        total_votes: usize,
    },
    Latest {
        selected_modality: ModalityType,
        selected_event: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub strategy: FusionStrategy,
    pub conflict_resolution: ConflictResolution,
    pub decision: Option<Intent>,
    pub confidence: f64,
    pub events_count: usize,
    pub modalities: Vec<ModalityType>,
    /// Labels present in the window that disagree with the decision.
    pub conflicts: Vec<Intent>,
    pub details: FusionDetails,
    pub timestamp: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Windowing
// ────────────────────────────────────────────────────────────────────────────

/// Events whose age at `now` is at most `window`, in their original order.
/// Events stamped after `now` count as fresh.
pub fn events_in_window(
    events: &[Arc<ModalityEvent>],
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<Arc<ModalityEvent>> {
    events
        .iter()
        .filter(|e| {
            now.signed_duration_since(e.timestamp)
                .to_std()
                .map_or(true, |age| age <= window)
        })
        .cloned()
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// Fuse an already-windowed set of events under `rule`.
pub fn fuse(events: &[Arc<ModalityEvent>], rule: &FusionRule, now: DateTime<Utc>) -> FusionOutcome {
    let labelled: Vec<(&ModalityEvent, Intent)> = events
        .iter()
        .filter_map(|e| extract_intent(e).map(|intent| (e.as_ref(), intent)))
        .collect();

    let (decision, confidence, details) = match rule.strategy {
        FusionStrategy::ConfidenceWeighted => confidence_weighted(&labelled, rule),
        FusionStrategy::PriorityBased => priority_based(events, rule),
        FusionStrategy::MajorityVote => majority_vote(&labelled, events.len()),
        FusionStrategy::TimeWindow => latest(&labelled),
    };

    let modalities: BTreeSet<ModalityType> = events.iter().map(|e| e.modality).collect();
    let conflicts = match &decision {
        Some(chosen) => distinct_labels(&labelled)
            .into_iter()
            .filter(|label| label != chosen)
            .collect(),
        None => Vec::new(),
    };

    FusionOutcome {
        strategy: rule.strategy,
        conflict_resolution: rule.conflict_resolution,
        decision,
        confidence: confidence.clamp(0.0, 1.0),
        events_count: events.len(),
        modalities: modalities.into_iter().collect(),
        conflicts,
        details,
        timestamp: now,
    }
}

type Decision = (Option<Intent>, f64, FusionDetails);

fn confidence_weighted(labelled: &[(&ModalityEvent, Intent)], rule: &FusionRule) -> Decision {
    let mut scores: Vec<IntentScore> = Vec::new();
    let mut total_weight = 0.0;

    for (event, intent) in labelled {
        let weight = rule.weight(event.modality);
        let contribution = weight * event.confidence;
        match scores.iter_mut().find(|s| &s.intent == intent) {
            Some(slot) => slot.score += contribution,
            None => scores.push(IntentScore {
                intent: intent.clone(),
                score: contribution,
            }),
        }
        total_weight += weight;
    }

    if scores.is_empty() || total_weight <= 0.0 {
        return (None, 0.0, FusionDetails::Undecided);
    }
    for slot in &mut scores {
        slot.score /= total_weight;
    }

    let best = first_max(&scores);
    (
        Some(best.intent.clone()),
        best.score,
        FusionDetails::Weighted {
            scores: scores.clone(),
            total_weight,
        },
    )
}

/// The strongest event of each modality speaks for it; a modality whose
/// strongest event carries no intent passes to the next one.
fn priority_based(events: &[Arc<ModalityEvent>], rule: &FusionRule) -> Decision {
    for modality in &rule.priority_order {
        let mut best: Option<&ModalityEvent> = None;
        for candidate in events.iter().filter(|e| e.modality == *modality) {
            if best.is_none_or(|b| candidate.confidence > b.confidence) {
                best = Some(candidate.as_ref());
            }
        }
        if let Some(event) = best
            && let Some(intent) = extract_intent(event)
        {
            return (
                Some(intent),
                event.confidence,
                FusionDetails::Priority {
                    selected_modality: *modality,
                    selected_event: event.id,
                },
            );
        }
    }
    (None, 0.0, FusionDetails::Undecided)
}

fn majority_vote(labelled: &[(&ModalityEvent, Intent)], window_len: usize) -> Decision {
    let mut votes: Vec<IntentScore> = Vec::new();
    for (_, intent) in labelled {
        match votes.iter_mut().find(|v| &v.intent == intent) {
            Some(slot) => slot.score += 1.0,
            None => votes.push(IntentScore {
                intent: intent.clone(),
                score: 1.0,
            }),
        }
    }

    if votes.is_empty() || window_len == 0 {
        return (None, 0.0, FusionDetails::Undecided);
    }

    let best = first_max(&votes);
    let vote_count = best.score as usize;
    (
        Some(best.intent.clone()),
        vote_count as f64 / window_len as f64,
        FusionDetails::Votes {
            votes: votes.clone(),
            vote_count,
            total_votes: window_len,
        },
    )
}

fn latest(labelled: &[(&ModalityEvent, Intent)]) -> Decision {
    // Later arrivals win ties on timestamp.
    let mut best: Option<&(&ModalityEvent, Intent)> = None;
    for candidate in labelled {
        if best.is_none_or(|(b, _)| candidate.0.timestamp >= b.timestamp) {
            best = Some(candidate);
        }
    }
    match best {
        Some((event, intent)) => (
            Some(intent.clone()),
            event.confidence,
            FusionDetails::Latest {
                selected_modality: event.modality,
                selected_event: event.id,
            },
        ),
        None => (None, 0.0, FusionDetails::Undecided),
    }
}

/// Highest score; the earliest entry wins a tie.  `scores` must be non-empty.
fn first_max(scores: &[IntentScore]) -> &IntentScore {
    let mut best = &scores[0];
    for candidate in &scores[1..] {
        if candidate.score > best.score {
            best = candidate;
        }
    }
    best
}

fn distinct_labels(labelled: &[(&ModalityEvent, Intent)]) -> Vec<Intent> {
    let mut seen: Vec<Intent> = Vec::new();
    for (_, intent) in labelled {
        if !seen.contains(intent) {
            seen.push(intent.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinfuse_types::GazeDirection;
    use chrono::TimeDelta;

    fn shared(events: Vec<ModalityEvent>) -> Vec<Arc<ModalityEvent>> {
        events.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn window_keeps_boundary_and_drops_older() {
        let now = Utc::now();
        let events = shared(vec![
            ModalityEvent::gaze(GazeDirection::Left, 0.9).at(now - TimeDelta::seconds(11)),
            ModalityEvent::gaze(GazeDirection::Left, 0.9).at(now - TimeDelta::seconds(10)),
            ModalityEvent::gesture("ok", 0.8).at(now - TimeDelta::seconds(2)),
            ModalityEvent::gesture("ok", 0.8).at(now + TimeDelta::milliseconds(5)),
        ]);
        let kept = events_in_window(&events, Duration::from_secs(10), now);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].id, events[1].id);
    }

    #[test]
    fn priority_prefers_audio_over_gesture() {
        let events = shared(vec![
            ModalityEvent::gaze(GazeDirection::Right, 0.9),
            ModalityEvent::intent("attention_confirm", 0.8),
            ModalityEvent::gesture("thumbs_down", 0.7),
        ]);
        let outcome = fuse(&events, &FusionRule::distraction_alert(), Utc::now());

        assert_eq!(outcome.decision, Some(Intent::Confirm));
        assert!((outcome.confidence - 0.8).abs() < 1e-9);
        assert!(matches!(
            outcome.details,
            FusionDetails::Priority { selected_modality: ModalityType::Audio, .. }
        ));
        assert_eq!(outcome.conflicts, vec![Intent::Distraction, Intent::Reject]);
        assert_eq!(outcome.events_count, 3);
    }

    #[test]
    fn priority_skips_modalities_without_intent() {
        let events = shared(vec![
            ModalityEvent::gaze(GazeDirection::Left, 0.9),
            ModalityEvent::speech("just talking", 0.95),
            ModalityEvent::gesture("wave", 0.6),
            ModalityEvent::gesture("thumbs_up", 0.7),
        ]);
        let outcome = fuse(&events, &FusionRule::distraction_alert(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Confirm));
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn priority_judges_modality_by_its_strongest_event() {
        // Raw ASR outscores the classified intent, so audio abstains and
        // the gesture decides.
        let events = shared(vec![
            ModalityEvent::gaze(GazeDirection::Left, 0.9),
            ModalityEvent::speech("I'm busy", 0.8),
            ModalityEvent::intent("busy", 0.5),
            ModalityEvent::gesture("thumbs_up", 0.7),
        ]);
        let outcome = fuse(&events, &FusionRule::distraction_alert(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Confirm));
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
        assert!(matches!(
            outcome.details,
            FusionDetails::Priority { selected_modality: ModalityType::Gesture, .. }
        ));
    }

    #[test]
    fn priority_tie_goes_to_earliest() {
        let first = ModalityEvent::gesture("wave", 0.7);
        let first_id = first.id;
        let events = shared(vec![
            ModalityEvent::gaze(GazeDirection::Left, 0.9),
            first,
            ModalityEvent::gesture("ok", 0.7),
        ]);
        let outcome = fuse(&events, &FusionRule::distraction_alert(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Attention));
        assert!(matches!(
            outcome.details,
            FusionDetails::Priority { selected_event, .. } if selected_event == first_id
        ));
    }

    #[test]
    fn confidence_weighted_normalises_by_intent_bearing_weight() {
        let events = shared(vec![
            ModalityEvent::speech("open navigation", 0.9),
            ModalityEvent::gesture("ok", 0.6),
        ]);
        let outcome = fuse(&events, &FusionRule::voice_command(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Confirm));
        // Only the gesture carries an intent: 0.3 * 0.6 / 0.3.
        assert!((outcome.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn confidence_weighted_picks_heaviest_label() {
        let events = shared(vec![
            ModalityEvent::intent("reject", 0.9),
            ModalityEvent::gesture("ok", 0.9),
            ModalityEvent::gaze(GazeDirection::Center, 0.9),
        ]);
        let outcome = fuse(&events, &FusionRule::voice_command(), Utc::now());
        // reject: 0.54, confirm: 0.27, attention: 0.09 over total 1.0.
        assert_eq!(outcome.decision, Some(Intent::Reject));
        assert!((outcome.confidence - 0.54).abs() < 1e-9);
        assert_eq!(outcome.conflicts, vec![Intent::Confirm, Intent::Attention]);
    }

    #[test]
    fn majority_vote_counts_all_window_events() {
        let events = shared(vec![
            ModalityEvent::gesture("ok", 0.6),
            ModalityEvent::gesture("thumbs_up", 0.6),
            ModalityEvent::gaze(GazeDirection::Left, 0.9),
            ModalityEvent::speech("hmm", 0.5),
        ]);
        let outcome = fuse(&events, &FusionRule::gesture_control(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Confirm));
        assert!((outcome.confidence - 0.5).abs() < 1e-9);
        match outcome.details {
            FusionDetails::Votes { vote_count, total_votes, .. } => {
                assert_eq!(vote_count, 2);
                assert_eq!(total_votes, 4);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn majority_vote_tie_goes_to_first_label() {
        let events = shared(vec![
            ModalityEvent::gesture("stop", 0.6),
            ModalityEvent::gaze(GazeDirection::Center, 0.9),
        ]);
        let outcome = fuse(&events, &FusionRule::gesture_control(), Utc::now());
        assert_eq!(outcome.decision, Some(Intent::Reject));
    }

    #[test]
    fn time_window_uses_latest_intent() {
        let now = Utc::now();
        let events = shared(vec![
            ModalityEvent::gesture("ok", 0.6).at(now - TimeDelta::seconds(2)),
            ModalityEvent::gesture("stop", 0.7).at(now - TimeDelta::seconds(1)),
            ModalityEvent::speech("no intent here", 0.9).at(now),
        ]);
        let mut rule = FusionRule::gesture_control();
        rule.strategy = FusionStrategy::TimeWindow;
        let outcome = fuse(&events, &rule, now);
        assert_eq!(outcome.decision, Some(Intent::Reject));
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn no_intent_means_no_decision() {
        let events = shared(vec![
            ModalityEvent::speech("hello", 0.9),
            ModalityEvent::head_pose(5.0, 0.0, 0.0, 0.9),
        ]);
        for rule in [
            FusionRule::distraction_alert(),
            FusionRule::voice_command(),
            FusionRule::gesture_control(),
        ] {
            let outcome = fuse(&events, &rule, Utc::now());
            assert_eq!(outcome.decision, None);
            assert_eq!(outcome.confidence, 0.0);
            assert!(outcome.conflicts.is_empty());
        }
    }
}
