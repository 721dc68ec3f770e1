//! Confidence assessment
//!
//! A response's trust score is a fixed, documented penalty model over a
//! handful of turn signals. Weights are constants, not learned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inputs gathered from one finalized turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceSignals {
    pub tool_call_count: usize,
    /// The accepted attempt failed verification
    pub has_errors: bool,
    pub response_length: usize,
    pub hallucination_score: Option<f64>,
    pub tool_errors: Option<usize>,
    pub data_age_minutes: Option<f64>,
}

/// Which penalty model to apply
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceModel {
    /// Six signals, base 0.95
    #[default]
    Reference,
    /// Tool usage, errors and length only, base 0.8
    Simple,
}

/// Responses shorter than this are penalized
const SHORT_RESPONSE_CHARS: usize = 50;

/// Market data older than this starts costing confidence
const STALE_AFTER_MINUTES: f64 = 30.0;

impl ConfidenceModel {
    pub fn assess(&self, signals: &ConfidenceSignals) -> f64 {
        match self {
            ConfidenceModel::Reference => assess_reference(signals),
            ConfidenceModel::Simple => assess_simple(signals),
        }
    }
}

/// Reference model: base 0.95, six independent penalties, clamped to [0, 1].
pub fn assess_reference(signals: &ConfidenceSignals) -> f64 {
    let mut confidence = 0.95;

    if signals.tool_call_count == 0 {
        confidence -= 0.35;
    }
    if signals.has_errors {
        confidence -= 0.15;
    }
    if signals.response_length < SHORT_RESPONSE_CHARS {
        confidence -= 0.10;
    }
    if let Some(score) = signals.hallucination_score {
        confidence -= (score.max(0.0) * 0.8).min(0.15);
    }
    if let Some(tool_errors) = signals.tool_errors {
        confidence -= tool_errors as f64 * 0.10;
    }
    if let Some(age) = signals.data_age_minutes {
        if age > STALE_AFTER_MINUTES {
            confidence -= ((age - STALE_AFTER_MINUTES) * 0.001).min(0.15);
        }
    }

    clamp_unit(confidence)
}

/// Simple model: base 0.8, three penalties, clamped to [0, 1].
pub fn assess_simple(signals: &ConfidenceSignals) -> f64 {
    let mut confidence = 0.8;

    if signals.tool_call_count == 0 {
        confidence -= 0.3;
    }
    if signals.has_errors {
        confidence -= 0.2;
    }
    if signals.response_length < SHORT_RESPONSE_CHARS {
        confidence -= 0.1;
    }

    clamp_unit(confidence)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

impl FromStr for ConfidenceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference" => Ok(ConfidenceModel::Reference),
            "simple" => Ok(ConfidenceModel::Simple),
            other => Err(format!("unknown confidence model '{}'", other)),
        }
    }
}

impl fmt::Display for ConfidenceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceModel::Reference => "reference",
            ConfidenceModel::Simple => "simple",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn healthy() -> ConfidenceSignals {
        ConfidenceSignals {
            tool_call_count: 3,
            has_errors: false,
            response_length: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_tools_lowers_confidence() {
        let without_tools = ConfidenceSignals {
            tool_call_count: 0,
            ..healthy()
        };
        assert!(assess_reference(&without_tools) < assess_reference(&healthy()));
    }

    #[test]
    fn test_reference_signals_one_by_one() {
        assert!((assess_reference(&healthy()) - 0.95).abs() < EPS);

        let cases: Vec<(ConfidenceSignals, f64)> = vec![
            (ConfidenceSignals { tool_call_count: 0, ..healthy() }, 0.60),
            (ConfidenceSignals { has_errors: true, ..healthy() }, 0.80),
            (ConfidenceSignals { response_length: 10, ..healthy() }, 0.85),
            (ConfidenceSignals { hallucination_score: Some(0.1), ..healthy() }, 0.87),
            (ConfidenceSignals { hallucination_score: Some(0.9), ..healthy() }, 0.80),
            (ConfidenceSignals { tool_errors: Some(2), ..healthy() }, 0.75),
            (ConfidenceSignals { data_age_minutes: Some(20.0), ..healthy() }, 0.95),
            (ConfidenceSignals { data_age_minutes: Some(80.0), ..healthy() }, 0.90),
            (ConfidenceSignals { data_age_minutes: Some(10_000.0), ..healthy() }, 0.80),
        ];

        for (signals, expected) in cases {
            let actual = assess_reference(&signals);
            assert!(
                (actual - expected).abs() < EPS,
                "expected {} got {} for {:?}",
                expected,
                actual,
                signals
            );
        }
    }

    #[test]
    fn test_simple_signals_one_by_one() {
        assert!((assess_simple(&healthy()) - 0.8).abs() < EPS);
        assert!(
            (assess_simple(&ConfidenceSignals { tool_call_count: 0, ..healthy() }) - 0.5).abs()
                < EPS
        );
        assert!(
            (assess_simple(&ConfidenceSignals { has_errors: true, ..healthy() }) - 0.6).abs() < EPS
        );
        assert!(
            (assess_simple(&ConfidenceSignals { response_length: 0, ..healthy() }) - 0.7).abs()
                < EPS
        );
    }

    #[test]
    fn test_extreme_inputs_are_clamped() {
        let worst = ConfidenceSignals {
            tool_call_count: 0,
            has_errors: true,
            response_length: 0,
            hallucination_score: Some(f64::MAX),
            tool_errors: Some(usize::MAX),
            data_age_minutes: Some(f64::MAX),
        };
        for model in [ConfidenceModel::Reference, ConfidenceModel::Simple] {
            let value = model.assess(&worst);
            assert!((0.0..=1.0).contains(&value));
        }

        let odd = ConfidenceSignals {
            hallucination_score: Some(-5.0),
            data_age_minutes: Some(f64::NAN),
            ..healthy()
        };
        let value = assess_reference(&odd);
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("Simple".parse::<ConfidenceModel>(), Ok(ConfidenceModel::Simple));
        assert!("learned".parse::<ConfidenceModel>().is_err());
    }
}
