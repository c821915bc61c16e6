//! Multi-factor confidence scoring for a proposed field mapping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub source_quality: f64,
    pub usage_frequency: f64,
    pub validation_success: f64,
    pub human_approval: f64,
    pub rag_similarity: f64,
}

pub const DEFAULT_WEIGHTS: ConfidenceWeights = ConfidenceWeights {
    source_quality: 0.20,
    usage_frequency: 0.15,
    validation_success: 0.30,
    human_approval: 0.25,
    rag_similarity: 0.10,
};

pub const AUTO_APPLY_THRESHOLD: f64 = 0.85;
pub const HITL_LOWER_THRESHOLD: f64 = 0.60;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceFactors {
    pub source_quality: f64,
    pub usage_count: u64,
    pub validation_success: f64,
    pub human_approval: f64,
    pub rag_similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingAction {
    AutoApply,
    HitlQueued,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScore {
    pub overall: f64,
    pub action: MappingAction,
    pub recommendations: Vec<String>,
}

fn normalize_usage_frequency(n: u64) -> f64 {
    (((n + 1) as f64).log10() / 3.0).min(1.0)
}

pub struct ConfidenceScoringService {
    weights: ConfidenceWeights,
}

impl Default for ConfidenceScoringService {
    fn default() -> Self {
        Self { weights: DEFAULT_WEIGHTS }
    }
}

impl ConfidenceScoringService {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, factors: &ConfidenceFactors) -> ConfidenceScore {
        let usage_frequency = normalize_usage_frequency(factors.usage_count);

        let weighted = [
            (factors.source_quality, self.weights.source_quality, "source_quality"),
            (usage_frequency, self.weights.usage_frequency, "usage_frequency"),
            (factors.validation_success, self.weights.validation_success, "validation_success"),
            (factors.human_approval, self.weights.human_approval, "human_approval"),
            (factors.rag_similarity, self.weights.rag_similarity, "rag_similarity"),
        ];

        let overall: f64 = weighted.iter().map(|(value, weight, _)| value * weight).sum();

        let action = self.determine_action(overall);
        let recommendations = weighted
            .iter()
            .filter(|(value, _, _)| *value < 0.5)
            .map(|(_, _, name)| format!("{name} is low; consider improving its inputs before relying on this mapping"))
            .collect();

        ConfidenceScore { overall, action, recommendations }
    }

    pub fn determine_action(&self, overall: f64) -> MappingAction {
        if overall >= AUTO_APPLY_THRESHOLD {
            MappingAction::AutoApply
        } else if overall >= HITL_LOWER_THRESHOLD {
            MappingAction::HitlQueued
        } else {
            MappingAction::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_scores_across_the_board_auto_apply() {
        let service = ConfidenceScoringService::default();
        let score = service.score(&ConfidenceFactors {
            source_quality: 0.95,
            usage_count: 500,
            validation_success: 0.95,
            human_approval: 0.9,
            rag_similarity: 0.9,
        });
        assert_eq!(score.action, MappingAction::AutoApply);
    }

    #[test]
    fn low_scores_are_rejected_and_carry_recommendations() {
        let service = ConfidenceScoringService::default();
        let score = service.score(&ConfidenceFactors::default());
        assert_eq!(score.action, MappingAction::Rejected);
        assert!(!score.recommendations.is_empty());
    }

    #[test]
    fn usage_frequency_normalization_matches_log10_rule() {
        assert!((normalize_usage_frequency(999) - (1000f64.log10() / 3.0)).abs() < 1e-9);
        assert_eq!(normalize_usage_frequency(999_999_999), 1.0);
    }

    #[test]
    fn tier_function_is_idempotent_given_a_fixed_score() {
        let service = ConfidenceScoringService::default();
        let a = service.determine_action(0.7);
        let b = service.determine_action(0.7);
        assert_eq!(a, b);
    }
}
