//! Fusion rules: which modalities a scenario needs, how long a fusion window
//! stays open, and which strategy turns the window into a decision.
//!
//! | Scenario | Strategy | Window | Required | Optional |
//! |---|---|---|---|---|
//! | `distraction_alert` | priority-based | 10 s | gaze | audio, gesture |
//! | `voice_command` | confidence-weighted | 5 s | audio | gesture, gaze |
//! | `gesture_control` | majority vote | 3 s | gesture | gaze, audio |

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use cabinfuse_types::{InteractionScenario, ModalityType};
use serde::{Deserialize, Serialize};

/// Weight used for a modality that has no entry in
/// [`FusionRule::modality_weights`].
pub const DEFAULT_MODALITY_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    MajorityVote,
    ConfidenceWeighted,
    PriorityBased,
    /// The most recent intent-bearing event decides.
    TimeWindow,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::MajorityVote => "majority_vote",
            FusionStrategy::ConfidenceWeighted => "confidence_weighted",
            FusionStrategy::PriorityBased => "priority_based",
            FusionStrategy::TimeWindow => "time_window",
        }
    }
}

impl std::fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared conflict policy.  Resolution itself is implied by the strategy;
/// this is carried into every outcome for explainability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    HighestConfidence,
    ModalityPriority,
    TemporalOrder,
    UserPreference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionRule {
    pub scenario: InteractionScenario,
    pub required_modalities: BTreeSet<ModalityType>,
    pub optional_modalities: BTreeSet<ModalityType>,
    pub time_window: Duration,
    pub strategy: FusionStrategy,
    pub conflict_resolution: ConflictResolution,
    pub modality_weights: BTreeMap<ModalityType, f64>,
    /// Highest priority first.
    pub priority_order: Vec<ModalityType>,
}

impl FusionRule {
    /// Weight of `modality`, falling back to [`DEFAULT_MODALITY_WEIGHT`].
    pub fn weight(&self, modality: ModalityType) -> f64 {
        self.modality_weights
            .get(&modality)
            .copied()
            .unwrap_or(DEFAULT_MODALITY_WEIGHT)
    }

    /// `true` when `received` covers every required modality and, if the
    /// rule declares optional modalities, at least one of them.
    pub fn can_fuse(&self, received: &BTreeSet<ModalityType>) -> bool {
        if !self.required_modalities.is_subset(received) {
            return false;
        }
        self.optional_modalities.is_empty() || !self.optional_modalities.is_disjoint(received)
    }

    pub fn distraction_alert() -> Self {
        Self {
            scenario: InteractionScenario::DistractionAlert,
            required_modalities: [ModalityType::Gaze].into(),
            optional_modalities: [ModalityType::Audio, ModalityType::Gesture].into(),
            time_window: Duration::from_secs(10),
            strategy: FusionStrategy::PriorityBased,
            conflict_resolution: ConflictResolution::ModalityPriority,
            modality_weights: [
                (ModalityType::Gaze, 0.4),
                (ModalityType::Audio, 0.4),
                (ModalityType::Gesture, 0.2),
            ]
            .into(),
            priority_order: vec![ModalityType::Audio, ModalityType::Gesture, ModalityType::Gaze],
        }
    }

    pub fn voice_command() -> Self {
        Self {
            scenario: InteractionScenario::VoiceCommand,
            required_modalities: [ModalityType::Audio].into(),
            optional_modalities: [ModalityType::Gesture, ModalityType::Gaze].into(),
            time_window: Duration::from_secs(5),
            strategy: FusionStrategy::ConfidenceWeighted,
            conflict_resolution: ConflictResolution::HighestConfidence,
            modality_weights: [
                (ModalityType::Audio, 0.6),
                (ModalityType::Gesture, 0.3),
                (ModalityType::Gaze, 0.1),
            ]
            .into(),
            priority_order: vec![ModalityType::Audio, ModalityType::Gesture, ModalityType::Gaze],
        }
    }

    pub fn gesture_control() -> Self {
        Self {
            scenario: InteractionScenario::GestureControl,
            required_modalities: [ModalityType::Gesture].into(),
            optional_modalities: [ModalityType::Gaze, ModalityType::Audio].into(),
            time_window: Duration::from_secs(3),
            strategy: FusionStrategy::MajorityVote,
            conflict_resolution: ConflictResolution::TemporalOrder,
            modality_weights: [
                (ModalityType::Gesture, 0.5),
                (ModalityType::Gaze, 0.3),
                (ModalityType::Audio, 0.2),
            ]
            .into(),
            priority_order: vec![ModalityType::Gesture, ModalityType::Gaze, ModalityType::Audio],
        }
    }
}

/// The three built-in rules keyed by scenario.
pub fn default_rules() -> HashMap<InteractionScenario, FusionRule> {
    [
        FusionRule::distraction_alert(),
        FusionRule::voice_command(),
        FusionRule::gesture_control(),
    ]
    .into_iter()
    .map(|rule| (rule.scenario.clone(), rule))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(modalities: &[ModalityType]) -> BTreeSet<ModalityType> {
        modalities.iter().copied().collect()
    }

    #[test]
    fn required_alone_is_not_enough_when_optional_declared() {
        let rule = FusionRule::distraction_alert();
        assert!(!rule.can_fuse(&set(&[ModalityType::Gaze])));
        assert!(rule.can_fuse(&set(&[ModalityType::Gaze, ModalityType::Gesture])));
        assert!(!rule.can_fuse(&set(&[ModalityType::Audio, ModalityType::Gesture])));
    }

    #[test]
    fn empty_optional_set_needs_only_required() {
        let mut rule = FusionRule::voice_command();
        rule.optional_modalities.clear();
        assert!(rule.can_fuse(&set(&[ModalityType::Audio])));
    }

    #[test]
    fn unknown_modality_weight_defaults_to_one() {
        let rule = FusionRule::voice_command();
        assert_eq!(rule.weight(ModalityType::Audio), 0.6);
        assert_eq!(rule.weight(ModalityType::HeadPose), DEFAULT_MODALITY_WEIGHT);
    }

    #[test]
    fn default_rules_cover_builtin_scenarios() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(
            rules[&InteractionScenario::DistractionAlert].strategy,
            FusionStrategy::PriorityBased
        );
        assert_eq!(
            rules[&InteractionScenario::VoiceCommand].strategy,
            FusionStrategy::ConfidenceWeighted
        );
        assert_eq!(
            rules[&InteractionScenario::GestureControl].time_window,
            Duration::from_secs(3)
        );
    }
}
