//! Hallucination detection
//!
//! Grounds each numeric claim of a response against the serialized tool
//! output of the same turn. Matching is substring based on the lower-cased
//! JSON corpus, tolerant to rounding and to percent-vs-fraction rendering.

use crate::verification::claims::{extract_claim_numbers, extract_claims};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Score above which the response should carry a warning
pub const WARN_THRESHOLD: f64 = 0.03;

/// Score above which the response should be regenerated
pub const REGENERATE_THRESHOLD: f64 = 0.05;

/// Numbers smaller than this are never used to ground a claim
const MIN_GROUNDING_MAGNITUDE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HallucinationResult {
    pub score: f64,
    pub flagged_claims: Vec<String>,
    pub grounded_claims: usize,
    pub total_claims: usize,
    pub should_warn: bool,
    pub should_regenerate: bool,
}

impl HallucinationResult {
    fn from_counts(flagged_claims: Vec<String>, total_claims: usize) -> Self {
        let score = if total_claims == 0 {
            0.0
        } else {
            (flagged_claims.len() as f64 / total_claims as f64).clamp(0.0, 1.0)
        };

        Self {
            score,
            grounded_claims: total_claims - flagged_claims.len(),
            flagged_claims,
            total_claims,
            should_warn: score > WARN_THRESHOLD,
            should_regenerate: score > REGENERATE_THRESHOLD,
        }
    }
}

/// Serialize tool results into the lower-cased search corpus.
pub fn build_corpus(tool_results: &[Value]) -> String {
    serde_json::to_string(tool_results)
        .unwrap_or_default()
        .to_lowercase()
}

/// Check every numeric claim in `response` against `tool_results`.
pub fn check(response: &str, tool_results: &[Value]) -> HallucinationResult {
    let claims = extract_claims(response);
    if claims.is_empty() {
        return HallucinationResult::from_counts(Vec::new(), 0);
    }

    let corpus = build_corpus(tool_results);
    let total_claims = claims.len();
    let flagged: Vec<String> = claims
        .into_iter()
        .filter(|claim| !is_claim_grounded(claim, &corpus))
        .collect();

    let result = HallucinationResult::from_counts(flagged, total_claims);

    debug!(
        total_claims = result.total_claims,
        flagged = result.flagged_claims.len(),
        score = result.score,
        "Hallucination check completed"
    );

    result
}

/// A claim is grounded when any of its numbers appears in the corpus in
/// one of its accepted renderings. Claims without numbers are grounded.
pub fn is_claim_grounded(claim: &str, corpus: &str) -> bool {
    let numbers = extract_claim_numbers(claim);
    if numbers.is_empty() {
        return true;
    }

    numbers.iter().any(|number| {
        number.value.abs() >= MIN_GROUNDING_MAGNITUDE
            && candidate_renderings(&number.literal, number.value)
                .iter()
                .any(|candidate| corpus.contains(candidate.as_str()))
    })
}

fn candidate_renderings(literal: &str, value: f64) -> Vec<String> {
    let mut candidates = vec![
        literal.to_lowercase(),
        value.to_string(),
        format!("{:.0}", value),
        format!("{:.1}", value),
        format!("{:.2}", value),
    ];

    if (0.0..=100.0).contains(&value) {
        let fraction = value / 100.0;
        candidates.push(format!("{:.2}", fraction));
        candidates.push(format!("{:.3}", fraction));
        candidates.push(format!("{:.4}", fraction));
    }

    candidates
}
