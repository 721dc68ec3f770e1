//! Response verification
//!
//! Deterministic checks run on every generated answer before it leaves
//! the orchestrator: numeric accuracy, claim grounding, confidence and
//! compliance footer.

pub mod accuracy;
pub mod claims;
pub mod confidence;
pub mod disclaimer;
pub mod hallucination;

pub use accuracy::{verify_numerical_accuracy, AccuracyOutcome, NumericMismatch};
pub use confidence::{ConfidenceModel, ConfidenceSignals};
pub use hallucination::HallucinationResult;

use crate::models::ToolCallRecord;
use serde_json::Value;
use tracing::info;

/// Outcome of verifying one attempt
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Numbers drifted from tool data
    Inaccurate(AccuracyOutcome),
    /// Too many ungrounded claims
    Ungrounded(HallucinationResult),
    Accepted(HallucinationResult),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Runs the accuracy and grounding checks in order
pub struct ResponseVerifier {
    tolerance: f64,
}

impl ResponseVerifier {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Accuracy only runs when both sides carry numbers.
    pub fn check_accuracy(&self, text: &str, tool_results: &[Value]) -> Option<AccuracyOutcome> {
        let response_numbers = claims::extract_numbers(text);
        if response_numbers.is_empty() {
            return None;
        }

        let corpus = serde_json::to_string(tool_results).unwrap_or_default();
        let tool_numbers = claims::extract_numbers(&corpus);
        if tool_numbers.is_empty() {
            return None;
        }

        Some(verify_numerical_accuracy(
            &response_numbers,
            &tool_numbers,
            self.tolerance,
        ))
    }

    pub fn verify(&self, text: &str, records: &[ToolCallRecord]) -> Verdict {
        let tool_results: Vec<Value> = records.iter().map(|r| r.result.clone()).collect();

        if let Some(outcome) = self.check_accuracy(text, &tool_results) {
            if !outcome.accurate {
                info!(
                    mismatches = outcome.mismatches.len(),
                    "Numeric accuracy check failed"
                );
                return Verdict::Inaccurate(outcome);
            }
        }

        let grounding = hallucination::check(text, &tool_results);
        info!(
            score = grounding.score,
            total_claims = grounding.total_claims,
            "Grounding check completed"
        );

        if grounding.should_regenerate {
            Verdict::Ungrounded(grounding)
        } else {
            Verdict::Accepted(grounding)
        }
    }
}

impl Default for ResponseVerifier {
    fn default() -> Self {
        Self::new(accuracy::DEFAULT_TOLERANCE)
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(result: Value) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: "portfolio_summary".to_string(),
            args: json!({}),
            result,
            duration_ms: 3,
            error: None,
        }
    }

    #[test]
    fn test_accepts_grounded_answer() {
        let verifier = ResponseVerifier::default();
        let records = [record(json!({ "totalValue": 100000.5, "returnPercent": 15.3 }))];

        let verdict = verifier.verify(
            "Your portfolio is worth $100,000.50 with a 15.3% return.",
            &records,
        );
        assert!(verdict.is_accepted());
    }

    #[test]
    fn test_inaccurate_before_grounding() {
        let verifier = ResponseVerifier::default();
        let records = [record(json!({ "totalValue": 100000, "returnPercent": 15.3 }))];

        let verdict = verifier.verify("You are up 25% this year.", &records);
        assert!(matches!(verdict, Verdict::Inaccurate(_)));
    }

    #[test]
    fn test_accuracy_skipped_without_tool_numbers() {
        let verifier = ResponseVerifier::default();
        assert!(verifier
            .check_accuracy("You are up 25%.", &[json!({ "status": "ok" })])
            .is_none());
        assert!(verifier
            .check_accuracy("No figures here.", &[json!({ "value": 3 })])
            .is_none());
    }

    #[test]
    fn test_ungrounded_without_tools() {
        let verifier = ResponseVerifier::default();
        let verdict = verifier.verify("Your return was 12.5% this year.", &[]);
        assert!(matches!(verdict, Verdict::Ungrounded(_)));
    }
}
