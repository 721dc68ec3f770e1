//! Numeric accuracy verification
//!
//! Coarse nearest-neighbor check run before hallucination detection:
//! every number in the response must lie close to some number in the
//! tool results.

use crate::verification::claims::extract_numbers;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relative drift tolerated when no tolerance is configured
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Response numbers below this magnitude are not checked
const MIN_CHECKED_MAGNITUDE: f64 = 0.001;

/// Absolute difference below which a drift is never a mismatch
const ABSOLUTE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericMismatch {
    pub response: f64,
    pub closest: f64,
    pub drift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccuracyOutcome {
    pub accurate: bool,
    pub mismatches: Vec<NumericMismatch>,
}

/// Compare response numbers against tool numbers.
///
/// With no tool numbers there is nothing to compare against and the
/// outcome is accurate.
pub fn verify_numerical_accuracy(
    response_numbers: &[f64],
    tool_numbers: &[f64],
    tolerance: f64,
) -> AccuracyOutcome {
    if tool_numbers.is_empty() {
        return AccuracyOutcome {
            accurate: true,
            mismatches: Vec::new(),
        };
    }

    let mismatches: Vec<NumericMismatch> = response_numbers
        .iter()
        .copied()
        .filter(|n| n.abs() >= MIN_CHECKED_MAGNITUDE)
        .filter_map(|n| {
            let closest = nearest(n, tool_numbers)?;
            let difference = (n - closest).abs();
            let drift = relative_drift(difference, closest);

            (drift > tolerance && difference > ABSOLUTE_FLOOR).then_some(NumericMismatch {
                response: n,
                closest,
                drift,
            })
        })
        .collect();

    AccuracyOutcome {
        accurate: mismatches.is_empty(),
        mismatches,
    }
}

/// Extract numbers from the response text and serialized tool results,
/// then compare them.
pub fn verify_response(response: &str, tool_results: &[Value], tolerance: f64) -> AccuracyOutcome {
    let corpus = serde_json::to_string(tool_results).unwrap_or_default();
    verify_numerical_accuracy(&extract_numbers(response), &extract_numbers(&corpus), tolerance)
}

fn nearest(n: f64, candidates: &[f64]) -> Option<f64> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| (n - a).abs().total_cmp(&(n - b).abs()))
}

fn relative_drift(difference: f64, closest: f64) -> f64 {
    if closest == 0.0 {
        if difference == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        difference / closest.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_numbers_present() {
        let outcome = verify_numerical_accuracy(
            &[100000.0, 15.3, 35.0],
            &[100000.0, 15.3, 35.0, 50000.0, 20.1],
            DEFAULT_TOLERANCE,
        );
        assert!(outcome.accurate);
        assert!(outcome.mismatches.is_empty());
    }

    #[test]
    fn test_fabricated_number_reports_closest() {
        let outcome =
            verify_numerical_accuracy(&[100000.0, 25.0], &[100000.0, 15.3], DEFAULT_TOLERANCE);
        assert!(!outcome.accurate);
        assert_eq!(outcome.mismatches.len(), 1);
        assert_eq!(outcome.mismatches[0].closest, 15.3);
        assert_eq!(outcome.mismatches[0].response, 25.0);
    }

    #[test]
    fn test_small_drift_within_tolerance() {
        let outcome = verify_numerical_accuracy(&[100.5], &[100.0], DEFAULT_TOLERANCE);
        assert!(outcome.accurate);
    }

    #[test]
    fn test_absolute_floor_ignores_near_zero() {
        // 0.005 vs 0.001 drifts 400% but differs by less than a cent
        let outcome = verify_numerical_accuracy(&[0.005], &[0.001], DEFAULT_TOLERANCE);
        assert!(outcome.accurate);
    }

    #[test]
    fn test_tiny_response_numbers_skipped() {
        let outcome = verify_numerical_accuracy(&[0.0005], &[500.0], DEFAULT_TOLERANCE);
        assert!(outcome.accurate);
    }

    #[test]
    fn test_zero_closest_is_mismatch_when_far() {
        let outcome = verify_numerical_accuracy(&[5.0], &[0.0], DEFAULT_TOLERANCE);
        assert!(!outcome.accurate);
        assert!(outcome.mismatches[0].drift.is_infinite());
    }

    #[test]
    fn test_verify_response_text() {
        let tool_results = [json!({ "totalValue": 100000, "returnPercent": 15.3 })];
        assert!(verify_response("Worth $100,000 and up 15.3%.", &tool_results, 0.01).accurate);
        assert!(!verify_response("Worth $100,000 and up 25%.", &tool_results, 0.01).accurate);
    }
}
