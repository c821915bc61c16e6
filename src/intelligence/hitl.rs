//! Human-in-the-loop approval workflow for `hitl_queued` field repairs.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::confidence::ConfidenceScore;
use super::heuristic::MappingProposal;

const APPROVAL_EXPIRY_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub tenant_id: String,
    pub field: String,
    pub proposal: MappingProposal,
    pub confidence: f64,
    pub status: ApprovalStatus,
    pub assigned_to: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HitlError {
    #[error("approval workflow {0} not found")]
    NotFound(Uuid),
    #[error("approval workflow {0} is already in a terminal state ({1:?})")]
    AlreadyDecided(Uuid, ApprovalStatus),
}

/// In-memory approval queue; one tenant admin per tenant for assignment.
pub struct HitlQueue {
    workflows: DashMap<Uuid, ApprovalWorkflow>,
}

impl HitlQueue {
    pub fn new() -> Self {
        Self { workflows: DashMap::new() }
    }

    pub fn submit(
        &self,
        tenant_id: &str,
        field: &str,
        proposal: MappingProposal,
        score: &ConfidenceScore,
        assigned_to: &str,
    ) -> ApprovalWorkflow {
        let now = Utc::now();
        let workflow = ApprovalWorkflow {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            field: field.to_string(),
            proposal,
            confidence: score.overall,
            status: ApprovalStatus::Pending,
            assigned_to: assigned_to.to_string(),
            created_at: now,
            expires_at: now + Duration::days(APPROVAL_EXPIRY_DAYS),
            decided_at: None,
            rejection_reason: None,
        };
        self.workflows.insert(workflow.id, workflow.clone());
        workflow
    }

    pub fn get(&self, id: Uuid) -> Option<ApprovalWorkflow> {
        self.workflows.get(&id).map(|w| w.clone())
    }

    fn mark_expired_if_due(workflow: &mut ApprovalWorkflow) {
        if workflow.status == ApprovalStatus::Pending && Utc::now() > workflow.expires_at {
            workflow.status = ApprovalStatus::Expired;
        }
    }

    pub fn approve(&self, id: Uuid) -> Result<ApprovalWorkflow, HitlError> {
        let mut entry = self.workflows.get_mut(&id).ok_or(HitlError::NotFound(id))?;
        Self::mark_expired_if_due(&mut entry);
        if entry.status != ApprovalStatus::Pending {
            return Err(HitlError::AlreadyDecided(id, entry.status));
        }
        entry.status = ApprovalStatus::Approved;
        entry.decided_at = Some(Utc::now());
        Ok(entry.clone())
    }

    pub fn reject(&self, id: Uuid, reason: &str) -> Result<ApprovalWorkflow, HitlError> {
        let mut entry = self.workflows.get_mut(&id).ok_or(HitlError::NotFound(id))?;
        Self::mark_expired_if_due(&mut entry);
        if entry.status != ApprovalStatus::Pending {
            return Err(HitlError::AlreadyDecided(id, entry.status));
        }
        entry.status = ApprovalStatus::Rejected;
        entry.decided_at = Some(Utc::now());
        entry.rejection_reason = Some(reason.to_string());
        Ok(entry.clone())
    }
}

impl Default for HitlQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::confidence::MappingAction;
    use crate::intelligence::heuristic::ProposalSource;

    fn score() -> ConfidenceScore {
        ConfidenceScore { overall: 0.7, action: MappingAction::HitlQueued, recommendations: Vec::new() }
    }

    fn proposal() -> MappingProposal {
        MappingProposal {
            canonical_field: "customer_id".to_string(),
            alternatives: Vec::new(),
            reasoning: "test".to_string(),
            source: ProposalSource::Heuristic,
            confidence: 0.7,
        }
    }

    #[test]
    fn submit_creates_a_pending_workflow_expiring_in_seven_days() {
        let queue = HitlQueue::new();
        let workflow = queue.submit("tenant-a", "cust_id", proposal(), &score(), "admin@tenant-a");
        assert_eq!(workflow.status, ApprovalStatus::Pending);
        let expected = workflow.created_at + Duration::days(7);
        assert_eq!(workflow.expires_at, expected);
    }

    #[test]
    fn approving_twice_is_rejected_the_second_time() {
        let queue = HitlQueue::new();
        let workflow = queue.submit("tenant-a", "cust_id", proposal(), &score(), "admin@tenant-a");
        queue.approve(workflow.id).unwrap();
        let err = queue.approve(workflow.id).unwrap_err();
        assert!(matches!(err, HitlError::AlreadyDecided(_, ApprovalStatus::Approved)));
    }

    #[test]
    fn reject_records_the_reason() {
        let queue = HitlQueue::new();
        let workflow = queue.submit("tenant-a", "cust_id", proposal(), &score(), "admin@tenant-a");
        let rejected = queue.reject(workflow.id, "low quality sample").unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("low quality sample"));
    }
}
