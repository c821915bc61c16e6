//! Schema-drift repair: RAG lookup, LLM (with heuristic fallback), multi-
//! factor confidence scoring, and human-in-the-loop approval, aggregated
//! per drift event into a [`RepairProposal`].

pub mod confidence;
pub mod heuristic;
pub mod hitl;
pub mod rag;

pub use confidence::{ConfidenceFactors, ConfidenceScore, ConfidenceScoringService, MappingAction};
pub use heuristic::{heuristic_mapping_fallback, propose_mapping, FieldContext, LlmProposer, MappingProposal, ProposalSource};
pub use hitl::{ApprovalStatus, ApprovalWorkflow, HitlError, HitlQueue};
pub use rag::{RagHit, RagQuery, RagStore, StaticRagStore, RAG_SHORT_CIRCUIT_THRESHOLD};

use serde::{Deserialize, Serialize};

/// A single field's repair, tagged with a `source` and scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRepair {
    pub field: String,
    pub canonical_field: String,
    pub source: ProposalSource,
    pub confidence: f64,
    pub action: MappingAction,
    pub recommendations: Vec<String>,
    pub approval_workflow_id: Option<uuid::Uuid>,
}

/// Aggregated repair proposal for a full drift event, rolled up from
/// per-field repairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairProposal {
    pub connector: String,
    pub table: String,
    pub repairs: Vec<FieldRepair>,
    pub field_count: usize,
    pub mean_confidence: f64,
    pub overall_action: MappingAction,
}

impl RepairProposal {
    fn aggregate(connector: &str, table: &str, repairs: Vec<FieldRepair>) -> Self {
        let field_count = repairs.len();
        let mean_confidence = if field_count == 0 {
            0.0
        } else {
            repairs.iter().map(|r| r.confidence).sum::<f64>() / field_count as f64
        };

        let overall_action = if repairs.iter().any(|r| r.action == MappingAction::AutoApply) {
            MappingAction::AutoApply
        } else if repairs.iter().any(|r| r.action == MappingAction::HitlQueued) {
            MappingAction::HitlQueued
        } else {
            MappingAction::Rejected
        };

        Self {
            connector: connector.to_string(),
            table: table.to_string(),
            repairs,
            field_count,
            mean_confidence,
            overall_action,
        }
    }
}

/// Per-field input to the pipeline: the field name and a few sample
/// values used to build the LLM prompt context.
#[derive(Debug, Clone)]
pub struct DriftField {
    pub field: String,
    pub sample_values: Vec<String>,
}

pub struct ConfidenceInputs {
    pub source_quality: f64,
    pub usage_count: u64,
    pub validation_success: f64,
    pub human_approval: f64,
}

impl Default for ConfidenceInputs {
    fn default() -> Self {
        Self { source_quality: 0.5, usage_count: 0, validation_success: 0.5, human_approval: 0.5 }
    }
}

/// Orchestrates RAG → LLM(+heuristic) → confidence → HITL for every field
/// in a drift event.
pub struct IntelligencePipeline {
    rag: Box<dyn RagStore>,
    llm: Box<dyn LlmProposer>,
    scoring: ConfidenceScoringService,
    hitl: HitlQueue,
}

impl IntelligencePipeline {
    pub fn new(rag: Box<dyn RagStore>, llm: Box<dyn LlmProposer>) -> Self {
        Self { rag, llm, scoring: ConfidenceScoringService::default(), hitl: HitlQueue::new() }
    }

    pub fn hitl_queue(&self) -> &HitlQueue {
        &self.hitl
    }

    /// Repair one field: RAG short-circuit, else LLM+heuristic, then score
    /// and, if `hitl_queued`, open an approval workflow.
    pub async fn repair_field(
        &self,
        tenant_id: &str,
        connector: &str,
        table: &str,
        entity: &str,
        field: &DriftField,
        inputs: ConfidenceInputs,
        assigned_to: &str,
    ) -> FieldRepair {
        let rag_hit = rag::lookup(
            self.rag.as_ref(),
            RagQuery { tenant_id, connector, table, field: &field.field },
        )
        .await
        .ok()
        .flatten();

        let (canonical_field, source, rag_similarity) = match &rag_hit {
            Some(hit) if hit.similarity >= RAG_SHORT_CIRCUIT_THRESHOLD => {
                (hit.canonical_field.clone(), ProposalSource::Rag, hit.similarity)
            }
            _ => {
                let proposal = propose_mapping(
                    self.llm.as_ref(),
                    FieldContext {
                        connector,
                        table,
                        field: &field.field,
                        sample_values: &field.sample_values,
                        canonical_entity: entity,
                    },
                )
                .await;
                let similarity = rag_hit.map(|h| h.similarity).unwrap_or(0.0);
                (proposal.canonical_field, proposal.source, similarity)
            }
        };

        let factors = ConfidenceFactors {
            source_quality: inputs.source_quality,
            usage_count: inputs.usage_count,
            validation_success: inputs.validation_success,
            human_approval: inputs.human_approval,
            rag_similarity: if source == ProposalSource::Rag { 1.0 } else { rag_similarity },
        };
        let score = self.scoring.score(&factors);

        let approval_workflow_id = if score.action == MappingAction::HitlQueued {
            let proposal = MappingProposal {
                canonical_field: canonical_field.clone(),
                alternatives: Vec::new(),
                reasoning: "queued for human review".to_string(),
                source,
                confidence: score.overall,
            };
            let workflow = self.hitl.submit(tenant_id, &field.field, proposal, &score, assigned_to);
            Some(workflow.id)
        } else {
            None
        };

        FieldRepair {
            field: field.field.clone(),
            canonical_field,
            source,
            confidence: score.overall,
            action: score.action,
            recommendations: score.recommendations,
            approval_workflow_id,
        }
    }

    pub async fn repair_drift(
        &self,
        tenant_id: &str,
        connector: &str,
        table: &str,
        entity: &str,
        fields: &[DriftField],
        assigned_to: &str,
    ) -> RepairProposal {
        let mut repairs = Vec::with_capacity(fields.len());
        for field in fields {
            repairs.push(
                self.repair_field(tenant_id, connector, table, entity, field, ConfidenceInputs::default(), assigned_to)
                    .await,
            );
        }
        RepairProposal::aggregate(connector, table, repairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heuristic::FailingLlmProposer;

    #[tokio::test]
    async fn high_similarity_rag_hit_short_circuits_with_rag_source() {
        let rag = StaticRagStore::new().seed(
            "orders",
            "cust_id",
            RagHit { canonical_field: "customer_id".to_string(), similarity: 0.96 },
        );
        let pipeline = IntelligencePipeline::new(Box::new(rag), Box::new(FailingLlmProposer));
        let repair = pipeline
            .repair_field(
                "tenant-a",
                "salesforce",
                "orders",
                "order",
                &DriftField { field: "cust_id".to_string(), sample_values: vec!["C-1".to_string()] },
                ConfidenceInputs { human_approval: 0.9, validation_success: 0.9, source_quality: 0.9, usage_count: 1000 },
                "admin@tenant-a",
            )
            .await;
        assert_eq!(repair.source, ProposalSource::Rag);
        assert_eq!(repair.action, MappingAction::AutoApply);
    }

    #[tokio::test]
    async fn low_confidence_repair_is_queued_for_hitl_approval() {
        let rag = StaticRagStore::new();
        let pipeline = IntelligencePipeline::new(Box::new(rag), Box::new(FailingLlmProposer));
        let repair = pipeline
            .repair_field(
                "tenant-a",
                "salesforce",
                "orders",
                "order",
                &DriftField { field: "cust_id".to_string(), sample_values: vec![] },
                ConfidenceInputs::default(),
                "admin@tenant-a",
            )
            .await;
        assert_eq!(repair.action, MappingAction::HitlQueued);
        assert!(repair.approval_workflow_id.is_some());
    }

    #[tokio::test]
    async fn aggregate_overall_action_prefers_auto_apply_over_hitl() {
        let auto = FieldRepair {
            field: "a".to_string(),
            canonical_field: "a_canon".to_string(),
            source: ProposalSource::Rag,
            confidence: 0.95,
            action: MappingAction::AutoApply,
            recommendations: Vec::new(),
            approval_workflow_id: None,
        };
        let hitl = FieldRepair {
            field: "b".to_string(),
            canonical_field: "b_canon".to_string(),
            source: ProposalSource::Heuristic,
            confidence: 0.7,
            action: MappingAction::HitlQueued,
            recommendations: Vec::new(),
            approval_workflow_id: None,
        };
        let proposal = RepairProposal::aggregate("salesforce", "orders", vec![auto, hitl]);
        assert_eq!(proposal.overall_action, MappingAction::AutoApply);
        assert_eq!(proposal.field_count, 2);
        assert!((proposal.mean_confidence - 0.825).abs() < 1e-9);
    }
}
