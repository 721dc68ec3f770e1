//! `compliance_checker`: concentration and diversification rules

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::error::AgentError;
use crate::models::Holding;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComplianceParams {
    /// Largest allowed single-position weight, as a fraction
    #[serde(default = "default_position_limit")]
    pub max_position_weight: f64,
    /// Largest allowed sector weight, as a fraction
    #[serde(default = "default_sector_limit")]
    pub max_sector_weight: f64,
    #[serde(default = "default_min_holdings")]
    pub min_holdings: usize,
}

fn default_position_limit() -> f64 {
    0.25
}

fn default_sector_limit() -> f64 {
    0.40
}

fn default_min_holdings() -> usize {
    5
}

impl ToolParams for ComplianceParams {
    fn validate(&self) -> Result<()> {
        for (name, limit) in [
            ("maxPositionWeight", self.max_position_weight),
            ("maxSectorWeight", self.max_sector_weight),
        ] {
            if !(limit > 0.0 && limit <= 1.0) {
                return Err(AgentError::ValidationError(format!(
                    "{} must be in (0, 1]",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a single rule
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCheck {
    pub rule_name: &'static str,
    pub passed: bool,
    pub details: String,
}

/// Evaluate every rule against `holdings`.
pub fn evaluate(holdings: &[Holding], params: &ComplianceParams) -> Vec<RuleCheck> {
    let total: f64 = holdings.iter().map(Holding::market_value).sum();
    let weight = |value: f64| if total > 0.0 { value / total } else { 0.0 };

    let mut checks = Vec::with_capacity(3);

    let over_position: Vec<String> = holdings
        .iter()
        .filter(|h| weight(h.market_value()) > params.max_position_weight)
        .map(|h| format!("{} at {:.2}%", h.symbol, weight(h.market_value()) * 100.0))
        .collect();
    checks.push(RuleCheck {
        rule_name: "position_concentration",
        passed: over_position.is_empty(),
        details: if over_position.is_empty() {
            format!(
                "No position above {:.0}%",
                params.max_position_weight * 100.0
            )
        } else {
            format!(
                "Above {:.0}% limit: {}",
                params.max_position_weight * 100.0,
                over_position.join(", ")
            )
        },
    });

    let mut sectors: BTreeMap<&str, f64> = BTreeMap::new();
    for holding in holdings {
        let sector = holding.sector.as_deref().unwrap_or("Unclassified");
        *sectors.entry(sector).or_default() += holding.market_value();
    }
    let over_sector: Vec<String> = sectors
        .iter()
        .filter(|(name, value)| {
            **name != "Unclassified" && weight(**value) > params.max_sector_weight
        })
        .map(|(name, value)| format!("{} at {:.2}%", name, weight(*value) * 100.0))
        .collect();
    checks.push(RuleCheck {
        rule_name: "sector_concentration",
        passed: over_sector.is_empty(),
        details: if over_sector.is_empty() {
            format!("No sector above {:.0}%", params.max_sector_weight * 100.0)
        } else {
            format!(
                "Above {:.0}% limit: {}",
                params.max_sector_weight * 100.0,
                over_sector.join(", ")
            )
        },
    });

    checks.push(RuleCheck {
        rule_name: "minimum_diversification",
        passed: holdings.len() >= params.min_holdings,
        details: format!(
            "{} holdings (minimum {})",
            holdings.len(),
            params.min_holdings
        ),
    });

    checks
}

pub struct ComplianceCheckerTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl ComplianceCheckerTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for ComplianceCheckerTool {
    fn name(&self) -> ToolName {
        ToolName::ComplianceChecker
    }

    fn description(&self) -> &'static str {
        "Check the portfolio against position concentration, sector concentration and diversification rules"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "maxPositionWeight": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 },
                "maxSectorWeight": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 },
                "minHoldings": { "type": "integer", "minimum": 0 }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: ComplianceParams = parse_params(args)?;
        let holdings = self.source.holdings().await?;
        let checks = evaluate(&holdings, &params);
        let passed = checks.iter().filter(|c| c.passed).count();

        Ok(json!({
            "compliant": passed == checks.len(),
            "passedChecks": passed,
            "totalChecks": checks.len(),
            "portfolioValue": round2(holdings.iter().map(Holding::market_value).sum()),
            "checks": checks,
        }))
    }
}
