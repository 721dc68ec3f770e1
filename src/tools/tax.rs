//! `tax_estimator`: FIFO realized gains for a tax year plus a flat-rate
//! liability estimate

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::error::AgentError;
use crate::tax::{compute_fifo, LotMethod};
use crate::Result;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_SHORT_TERM_RATE: f64 = 0.24;
const DEFAULT_LONG_TERM_RATE: f64 = 0.15;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaxEstimatorParams {
    #[serde(default = "current_year")]
    pub tax_year: i32,
    #[serde(default)]
    pub lot_method: LotMethod,
    #[serde(default = "default_short_rate")]
    pub short_term_rate: f64,
    #[serde(default = "default_long_rate")]
    pub long_term_rate: f64,
}

fn current_year() -> i32 {
    Utc::now().year()
}

fn default_short_rate() -> f64 {
    DEFAULT_SHORT_TERM_RATE
}

fn default_long_rate() -> f64 {
    DEFAULT_LONG_TERM_RATE
}

impl ToolParams for TaxEstimatorParams {
    fn validate(&self) -> Result<()> {
        if !(1900..=2200).contains(&self.tax_year) {
            return Err(AgentError::ValidationError(format!(
                "taxYear {} is out of range",
                self.tax_year
            )));
        }
        let rates = [
            ("shortTermRate", self.short_term_rate),
            ("longTermRate", self.long_term_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(AgentError::ValidationError(format!(
                    "{} must be between 0 and 1",
                    name
                )));
            }
        }
        Ok(())
    }
}

pub struct TaxEstimatorTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl TaxEstimatorTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for TaxEstimatorTool {
    fn name(&self) -> ToolName {
        ToolName::TaxEstimator
    }

    fn description(&self) -> &'static str {
        "Realized short/long-term capital gains for a tax year using FIFO lot matching, with a simplified flat-rate tax estimate"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "taxYear": { "type": "integer" },
                "lotMethod": { "type": "string", "enum": ["FIFO"] },
                "shortTermRate": { "type": "number", "minimum": 0, "maximum": 1 },
                "longTermRate": { "type": "number", "minimum": 0, "maximum": 1 }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: TaxEstimatorParams = parse_params(args)?;
        let activities = self.source.activities().await?;

        let report = compute_fifo(&activities, params.tax_year, params.lot_method)?;

        let estimated_tax = estimate_tax(
            report.short_term_gain,
            report.long_term_gain,
            params.short_term_rate,
            params.long_term_rate,
        );

        let mut out = serde_json::to_value(&report)?;
        out["estimatedTax"] = json!(round2(estimated_tax));
        out["shortTermRate"] = json!(params.short_term_rate);
        out["longTermRate"] = json!(params.long_term_rate);
        for key in ["realizedGain", "shortTermGain", "longTermGain", "unrealizedCostBasis"] {
            if let Some(value) = out[key].as_f64() {
                out[key] = json!(round2(value));
            }
        }

        Ok(out)
    }
}

/// Flat-rate liability. A loss in one bucket offsets gains in the other
/// and the net is taxed at the rate of the bucket that stayed positive.
fn estimate_tax(short_term: f64, long_term: f64, short_rate: f64, long_rate: f64) -> f64 {
    match (short_term >= 0.0, long_term >= 0.0) {
        (true, true) => short_term * short_rate + long_term * long_rate,
        (false, true) => (long_term + short_term).max(0.0) * long_rate,
        (true, false) => (short_term + long_term).max(0.0) * short_rate,
        (false, false) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Activity, ActivityType};
    use crate::tools::InMemoryDataSource;
    use chrono::NaiveDate;

    fn activity(kind: ActivityType, date: &str, quantity: f64, price: f64) -> Activity {
        Activity {
            symbol: "AAPL".to_string(),
            activity_type: kind,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            quantity,
            unit_price: price,
            fee: 0.0,
        }
    }

    fn tool(activities: Vec<Activity>) -> TaxEstimatorTool {
        TaxEstimatorTool::new(Arc::new(InMemoryDataSource::new(vec![], activities, vec![])))
    }

    #[tokio::test]
    async fn test_estimate_for_year() {
        let tool = tool(vec![
            activity(ActivityType::Buy, "2024-01-10", 10.0, 100.0),
            activity(ActivityType::Buy, "2025-03-01", 10.0, 120.0),
            activity(ActivityType::Sell, "2025-06-15", 20.0, 150.0),
        ]);

        let out = tool.execute(&json!({ "taxYear": 2025 })).await.unwrap();
        assert_eq!(out["realizedGain"], json!(800.0));
        assert_eq!(out["longTermGain"], json!(500.0));
        assert_eq!(out["shortTermGain"], json!(300.0));
        assert_eq!(out["lotMethod"], json!("FIFO"));
        // 300 * 0.24 + 500 * 0.15
        assert_eq!(out["estimatedTax"], json!(147.0));
    }

    #[tokio::test]
    async fn test_net_loss_owes_nothing() {
        let tool = tool(vec![
            activity(ActivityType::Buy, "2025-01-10", 10.0, 100.0),
            activity(ActivityType::Sell, "2025-06-15", 10.0, 80.0),
        ]);

        let out = tool.execute(&json!({ "taxYear": 2025 })).await.unwrap();
        assert_eq!(out["realizedGain"], json!(-200.0));
        assert_eq!(out["estimatedTax"], json!(0.0));
    }

    #[test]
    fn test_loss_offsets_other_bucket() {
        assert!((estimate_tax(-100.0, 500.0, 0.24, 0.15) - 60.0).abs() < 1e-9);
        assert!((estimate_tax(400.0, -100.0, 0.24, 0.15) - 72.0).abs() < 1e-9);
        assert_eq!(estimate_tax(-1.0, -1.0, 0.24, 0.15), 0.0);
    }

    #[tokio::test]
    async fn test_lot_method_is_case_insensitive() {
        let tool = tool(vec![]);
        let out = tool
            .execute(&json!({ "taxYear": 2025, "lotMethod": "fifo" }))
            .await
            .unwrap();
        assert_eq!(out["lotMethod"], json!("FIFO"));
    }

    #[tokio::test]
    async fn test_rejects_other_lot_methods() {
        let tool = tool(vec![]);
        let result = tool
            .execute(&json!({ "taxYear": 2025, "lotMethod": "LIFO" }))
            .await;
        assert!(matches!(result, Err(AgentError::ValidationError(_))));
    }
}
