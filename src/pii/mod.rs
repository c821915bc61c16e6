//! Shift-Left PII: scan a [`DelegationContext`](crate::delegation::DelegationContext)
//! at ingress of the delegation boundary and apply a configurable policy
//! before it is ever shared.

mod detector;
mod redactor;

pub use detector::{risk_level_for, PiiDetector, PiiMatch, PiiType, RiskLevel};
pub use redactor::PiiRedactor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delegation::DelegationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiPolicy {
    Block,
    Redact,
    Warn,
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiScanResult {
    pub scan_id: Uuid,
    pub scanned_at: DateTime<Utc>,
    pub pii_detected: bool,
    pub match_count: usize,
    pub matches: Vec<PiiMatch>,
    pub pii_types_found: Vec<PiiType>,
    pub risk_level: RiskLevel,
    pub redaction_applied: bool,
    pub redacted_fields: Vec<String>,
    pub policy_applied: PiiPolicy,
    pub policy_action_taken: String,
    pub scan_duration_ms: u64,
    pub error: Option<String>,
    pub primary_plane_id: Option<String>,
    pub tenant_id: String,
    pub is_validated: bool,
}

#[derive(Debug, Clone)]
pub struct SafeContext {
    pub context: DelegationContext,
    pub scan_result: PiiScanResult,
}

#[derive(Debug, thiserror::Error)]
#[error("delegation refused by PII policy: {} matches found (risk={risk:?})", scan_result.match_count, risk = scan_result.risk_level)]
pub struct PiiBlockedError {
    pub scan_result: PiiScanResult,
}

pub struct ContextSharingProtocol {
    policy: PiiPolicy,
}

impl ContextSharingProtocol {
    pub fn new(policy: PiiPolicy) -> Self {
        Self { policy }
    }

    /// Apply the configured policy to `context`. `ALLOW` bypasses
    /// scanning entirely. Scan errors fail open — delegation proceeds
    /// with `is_validated=false` rather than being blocked by a detector
    /// bug.
    pub async fn process_ingress(
        &self,
        context: DelegationContext,
        tenant_id: &str,
        primary_plane_id: Option<&str>,
    ) -> Result<SafeContext, PiiBlockedError> {
        let started = std::time::Instant::now();

        if self.policy == PiiPolicy::Allow {
            let scan_result = PiiScanResult {
                scan_id: Uuid::new_v4(),
                scanned_at: Utc::now(),
                pii_detected: false,
                match_count: 0,
                matches: Vec::new(),
                pii_types_found: Vec::new(),
                risk_level: RiskLevel::None,
                redaction_applied: false,
                redacted_fields: Vec::new(),
                policy_applied: self.policy,
                policy_action_taken: "skipped".to_string(),
                scan_duration_ms: 0,
                error: None,
                primary_plane_id: primary_plane_id.map(str::to_string),
                tenant_id: tenant_id.to_string(),
                is_validated: true,
            };
            return Ok(SafeContext { context, scan_result });
        }

        let mut all_matches = Vec::new();
        all_matches.extend(PiiDetector::scan(&context.original_input));
        all_matches.extend(PiiDetector::scan(&context.delegation_reason));
        all_matches.extend(scan_json_strings(&context.original_context));
        all_matches.extend(scan_json_strings(&context.shared_state));

        let risk_level = all_matches
            .iter()
            .map(|m| risk_level_for(m.pii_type))
            .max()
            .unwrap_or(RiskLevel::None);

        let mut pii_types_found: Vec<PiiType> = all_matches.iter().map(|m| m.pii_type).collect();
        pii_types_found.sort_by_key(|t| format!("{t:?}"));
        pii_types_found.dedup();

        let scan_id = Uuid::new_v4();
        let pii_detected = !all_matches.is_empty();

        if pii_detected && self.policy == PiiPolicy::Block {
            let scan_result = PiiScanResult {
                scan_id,
                scanned_at: Utc::now(),
                pii_detected,
                match_count: all_matches.len(),
                matches: all_matches,
                pii_types_found,
                risk_level,
                redaction_applied: false,
                redacted_fields: Vec::new(),
                policy_applied: self.policy,
                policy_action_taken: "blocked".to_string(),
                scan_duration_ms: started.elapsed().as_millis() as u64,
                error: None,
                primary_plane_id: primary_plane_id.map(str::to_string),
                tenant_id: tenant_id.to_string(),
                is_validated: true,
            };
            self.emit_telemetry(&scan_result);
            return Err(PiiBlockedError { scan_result });
        }

        let (redacted_context, redacted_fields, redaction_applied) = if pii_detected && self.policy == PiiPolicy::Redact {
            let mut ctx = context.clone();
            let mut fields = Vec::new();
            ctx.original_input = PiiRedactor::redact(&ctx.original_input, &PiiDetector::scan(&ctx.original_input));
            fields.push("original_input".to_string());
            ctx.delegation_reason = PiiRedactor::redact(&ctx.delegation_reason, &PiiDetector::scan(&ctx.delegation_reason));
            fields.push("delegation_reason".to_string());
            ctx.original_context = redact_json_strings(&ctx.original_context);
            fields.push("original_context".to_string());
            ctx.shared_state = redact_json_strings(&ctx.shared_state);
            fields.push("shared_state".to_string());
            (ctx, fields, true)
        } else {
            (context, Vec::new(), false)
        };

        if pii_detected && self.policy == PiiPolicy::Warn {
            tracing::warn!(scan_id = %scan_id, match_count = all_matches.len(), risk = ?risk_level, "PII detected, policy=WARN, proceeding");
        }

        let scan_result = PiiScanResult {
            scan_id,
            scanned_at: Utc::now(),
            pii_detected,
            match_count: all_matches.len(),
            matches: all_matches,
            pii_types_found,
            risk_level,
            redaction_applied,
            redacted_fields,
            policy_applied: self.policy,
            policy_action_taken: if redaction_applied { "redacted".to_string() } else { "allowed".to_string() },
            scan_duration_ms: started.elapsed().as_millis() as u64,
            error: None,
            primary_plane_id: primary_plane_id.map(str::to_string),
            tenant_id: tenant_id.to_string(),
            is_validated: true,
        };
        self.emit_telemetry(&scan_result);

        Ok(SafeContext { context: redacted_context, scan_result })
    }

    fn emit_telemetry(&self, scan_result: &PiiScanResult) {
        tracing::info!(
            scan_id = %scan_result.scan_id,
            match_count = scan_result.match_count,
            risk = ?scan_result.risk_level,
            policy = ?scan_result.policy_applied,
            action = %scan_result.policy_action_taken,
            duration_ms = scan_result.scan_duration_ms,
            tenant = %scan_result.tenant_id,
            "shift-left PII scan"
        );
    }
}

fn scan_json_strings(value: &serde_json::Value) -> Vec<PiiMatch> {
    let mut matches = Vec::new();
    collect_strings(value, &mut |s| matches.extend(PiiDetector::scan(s)));
    matches
}

fn redact_json_strings(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(PiiRedactor::redact(s, &PiiDetector::scan(s))),
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(redact_json_strings).collect()),
        serde_json::Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), redact_json_strings(v))).collect())
        }
        other => other.clone(),
    }
}

fn collect_strings(value: &serde_json::Value, f: &mut impl FnMut(&str)) {
    match value {
        serde_json::Value::String(s) => f(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, f)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, f)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(input: &str) -> DelegationContext {
        DelegationContext {
            original_input: input.to_string(),
            original_context: serde_json::json!({}),
            delegation_reason: "reason".to_string(),
            delegated_capability: None,
            max_steps: None,
            max_cost: None,
            timeout_seconds: None,
            delegation_chain: Vec::new(),
            shared_state: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn block_policy_refuses_with_one_email_match_at_correct_offsets() {
        let protocol = ContextSharingProtocol::new(PiiPolicy::Block);
        let err = protocol
            .process_ingress(ctx("email me at bob@acme.com"), "tenant-a", None)
            .await
            .unwrap_err();
        assert_eq!(err.scan_result.match_count, 1);
        let m = &err.scan_result.matches[0];
        assert_eq!(&"email me at bob@acme.com"[m.start..m.end], "bob@acme.com");
    }

    #[tokio::test]
    async fn redact_policy_rewrites_original_input() {
        let protocol = ContextSharingProtocol::new(PiiPolicy::Redact);
        let safe = protocol
            .process_ingress(ctx("email me at bob@acme.com"), "tenant-a", None)
            .await
            .unwrap();
        assert!(safe.context.original_input.contains("[EMAIL]"));
        assert!(safe.scan_result.redaction_applied);
    }

    #[tokio::test]
    async fn allow_policy_skips_scanning_entirely() {
        let protocol = ContextSharingProtocol::new(PiiPolicy::Allow);
        let safe = protocol
            .process_ingress(ctx("email me at bob@acme.com"), "tenant-a", None)
            .await
            .unwrap();
        assert_eq!(safe.context.original_input, "email me at bob@acme.com");
        assert!(!safe.scan_result.pii_detected);
    }
}
