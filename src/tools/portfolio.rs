//! `portfolio_summary`: totals, return and per-holding weights

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortfolioSummaryParams {
    #[serde(default = "default_true")]
    pub include_holdings: bool,
}

fn default_true() -> bool {
    true
}

impl ToolParams for PortfolioSummaryParams {}

pub struct PortfolioSummaryTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl PortfolioSummaryTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for PortfolioSummaryTool {
    fn name(&self) -> ToolName {
        ToolName::PortfolioSummary
    }

    fn description(&self) -> &'static str {
        "Current portfolio value, cost basis, unrealized gain and per-holding weights"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "includeHoldings": {
                    "type": "boolean",
                    "description": "Include the per-holding breakdown (default true)"
                }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: PortfolioSummaryParams = parse_params(args)?;
        let holdings = self.source.holdings().await?;

        let total_value: f64 = holdings.iter().map(|h| h.market_value()).sum();
        let total_cost: f64 = holdings.iter().map(|h| h.cost_basis).sum();
        let unrealized_gain = total_value - total_cost;
        let return_percent = if total_cost > 0.0 {
            unrealized_gain / total_cost * 100.0
        } else {
            0.0
        };

        let mut summary = json!({
            "totalValue": round2(total_value),
            "totalCostBasis": round2(total_cost),
            "unrealizedGain": round2(unrealized_gain),
            "returnPercent": round2(return_percent),
            "holdingCount": holdings.len(),
        });

        if params.include_holdings {
            let breakdown: Vec<Value> = holdings
                .iter()
                .map(|h| {
                    let value = h.market_value();
                    let weight_percent = if total_value > 0.0 {
                        round2(value / total_value * 100.0)
                    } else {
                        0.0
                    };
                    json!({
                        "symbol": h.symbol,
                        "name": h.name,
                        "quantity": h.quantity,
                        "marketValue": round2(value),
                        "costBasis": round2(h.cost_basis),
                        "gain": round2(value - h.cost_basis),
                        "weightPercent": weight_percent,
                        "assetClass": h.asset_class,
                    })
                })
                .collect();
            summary["holdings"] = Value::Array(breakdown);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InMemoryDataSource;
    use chrono::Utc;

    #[tokio::test]
    async fn test_summary_totals() {
        let tool = PortfolioSummaryTool::new(Arc::new(InMemoryDataSource::sample(Utc::now())));
        let out = tool.execute(&json!({})).await.unwrap();

        // 40*190 + 30*260 + 60*72.5
        assert_eq!(out["totalValue"], json!(19750.0));
        assert_eq!(out["totalCostBasis"], json!(16000.0));
        assert_eq!(out["unrealizedGain"], json!(3750.0));
        assert_eq!(out["returnPercent"], json!(23.44));
        assert_eq!(out["holdings"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_summary_without_holdings() {
        let tool = PortfolioSummaryTool::new(Arc::new(InMemoryDataSource::default()));
        let out = tool.execute(&json!({ "includeHoldings": false })).await.unwrap();

        assert_eq!(out["totalValue"], json!(0.0));
        assert_eq!(out["returnPercent"], json!(0.0));
        assert!(out.get("holdings").is_none());
    }
}
