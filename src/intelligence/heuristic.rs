//! LLM-backed field mapping proposal, with a deterministic heuristic
//! fallback used when the LLM call itself is exhausted by the resilience
//! stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resilience::{DependencyKind, ResilienceStack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    Rag,
    Llm,
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingProposal {
    pub canonical_field: String,
    pub alternatives: Vec<String>,
    pub reasoning: String,
    pub source: ProposalSource,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct FieldContext<'a> {
    pub connector: &'a str,
    pub table: &'a str,
    pub field: &'a str,
    pub sample_values: &'a [String],
    pub canonical_entity: &'a str,
}

#[async_trait]
pub trait LlmProposer: Send + Sync {
    async fn propose(&self, ctx: FieldContext<'_>) -> anyhow::Result<MappingProposal>;
}

/// Always fails, used in tests to force the heuristic fallback path.
pub struct FailingLlmProposer;

#[async_trait]
impl LlmProposer for FailingLlmProposer {
    async fn propose(&self, _ctx: FieldContext<'_>) -> anyhow::Result<MappingProposal> {
        anyhow::bail!("llm unavailable")
    }
}

const BUILTIN_LEXICON: &[(&str, &str)] = &[
    ("cust_id", "customer_id"),
    ("customer_no", "customer_id"),
    ("acct_id", "account_id"),
    ("order_num", "order_id"),
    ("prod_code", "product_id"),
    ("ship_addr", "shipping_address"),
    ("bill_addr", "billing_address"),
    ("em", "email"),
    ("ph", "phone_number"),
    ("dob", "date_of_birth"),
];

const STRING_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Normalized Levenshtein similarity in `[0, 1]`.
fn string_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let distance = levenshtein(&a, &b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        1.0
    } else {
        1.0 - (distance as f64 / max_len as f64)
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Exact-match lexicon lookup, then best string-similarity candidate
/// at or above threshold, else `unmapped` at confidence 0.30. Always
/// tagged `source=heuristic, action=hitl_queued`.
pub fn heuristic_mapping_fallback(field: &str) -> MappingProposal {
    let lowered = field.to_lowercase();

    if let Some((_, canonical)) = BUILTIN_LEXICON.iter().find(|(k, _)| *k == lowered) {
        return MappingProposal {
            canonical_field: canonical.to_string(),
            alternatives: Vec::new(),
            reasoning: "exact match in built-in lexicon".to_string(),
            source: ProposalSource::Heuristic,
            confidence: 0.75,
        };
    }

    let mut best: Option<(&str, f64)> = None;
    for (_, canonical) in BUILTIN_LEXICON {
        let score = string_similarity(&lowered, canonical);
        if best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((canonical, score));
        }
    }

    match best {
        Some((canonical, score)) if score >= STRING_SIMILARITY_THRESHOLD => MappingProposal {
            canonical_field: canonical.to_string(),
            alternatives: Vec::new(),
            reasoning: format!("string similarity {score:.2} to '{canonical}'"),
            source: ProposalSource::Heuristic,
            confidence: score,
        },
        _ => MappingProposal {
            canonical_field: "unmapped".to_string(),
            alternatives: Vec::new(),
            reasoning: "no lexicon entry or similar candidate found".to_string(),
            source: ProposalSource::Heuristic,
            confidence: 0.30,
        },
    }
}

/// Resilience-wrapped LLM call with `heuristic_mapping_fallback` as the
/// named fallback.
pub async fn propose_mapping(proposer: &dyn LlmProposer, ctx: FieldContext<'_>) -> MappingProposal {
    let connector = ctx.connector.to_string();
    let table = ctx.table.to_string();
    let field = ctx.field.to_string();
    let sample_values = ctx.sample_values.to_vec();
    let canonical_entity = ctx.canonical_entity.to_string();

    let result = ResilienceStack::global()
        .call_with_fallback(
            DependencyKind::Llm,
            "heuristic_mapping_fallback",
            {
                let field = field.clone();
                move || {
                    let connector = connector.clone();
                    let table = table.clone();
                    let field = field.clone();
                    let sample_values = sample_values.clone();
                    let canonical_entity = canonical_entity.clone();
                    async move {
                        let ctx = FieldContext {
                            connector: &connector,
                            table: &table,
                            field: &field,
                            sample_values: &sample_values,
                            canonical_entity: &canonical_entity,
                        };
                        proposer.propose(ctx).await
                    }
                }
            },
            || async { Ok(heuristic_mapping_fallback(&field)) },
        )
        .await;

    result.unwrap_or_else(|_| heuristic_mapping_fallback(&ctx.field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_lexicon_match_wins() {
        let proposal = heuristic_mapping_fallback("cust_id");
        assert_eq!(proposal.canonical_field, "customer_id");
        assert_eq!(proposal.source, ProposalSource::Heuristic);
    }

    #[test]
    fn similar_field_falls_back_to_nearest_candidate() {
        let proposal = heuristic_mapping_fallback("cust_ids");
        assert_eq!(proposal.canonical_field, "customer_id");
    }

    #[test]
    fn unrecognized_field_is_unmapped_at_low_confidence() {
        let proposal = heuristic_mapping_fallback("zzz_totally_unrelated_xyz");
        assert_eq!(proposal.canonical_field, "unmapped");
        assert_eq!(proposal.confidence, 0.30);
    }

    #[tokio::test]
    async fn failing_llm_falls_through_to_heuristic() {
        let proposal = propose_mapping(
            &FailingLlmProposer,
            FieldContext {
                connector: "salesforce",
                table: "orders",
                field: "cust_id",
                sample_values: &[],
                canonical_entity: "order",
            },
        )
        .await;
        assert_eq!(proposal.source, ProposalSource::Heuristic);
        assert_eq!(proposal.canonical_field, "customer_id");
    }
}
