//! `allocation_optimizer`: asset-class drift against a target mix and the
//! trades that would close it. Suggestions only; nothing is executed.

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::error::AgentError;
use crate::models::{AssetClass, Holding};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Moderate => "moderate",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    pub fn target_weights(&self) -> BTreeMap<AssetClass, f64> {
        let weights: &[(AssetClass, f64)] = match self {
            RiskProfile::Conservative => &[
                (AssetClass::Equity, 0.30),
                (AssetClass::FixedIncome, 0.60),
                (AssetClass::Cash, 0.10),
            ],
            RiskProfile::Moderate => &[
                (AssetClass::Equity, 0.60),
                (AssetClass::FixedIncome, 0.35),
                (AssetClass::Cash, 0.05),
            ],
            RiskProfile::Aggressive => &[
                (AssetClass::Equity, 0.85),
                (AssetClass::FixedIncome, 0.10),
                (AssetClass::Cash, 0.05),
            ],
        };
        weights.iter().copied().collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AllocationParams {
    /// Explicit target weights as fractions; overrides `risk_profile`
    pub target_weights: Option<BTreeMap<AssetClass, f64>>,
    #[serde(default)]
    pub risk_profile: RiskProfile,
    /// Drift, in percentage points, above which rebalancing is suggested
    #[serde(default = "default_threshold")]
    pub rebalance_threshold: f64,
}

fn default_threshold() -> f64 {
    5.0
}

impl ToolParams for AllocationParams {
    fn validate(&self) -> Result<()> {
        if !(self.rebalance_threshold >= 0.0 && self.rebalance_threshold <= 100.0) {
            return Err(AgentError::ValidationError(
                "rebalanceThreshold must be between 0 and 100".to_string(),
            ));
        }

        if let Some(weights) = &self.target_weights {
            if weights.values().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(AgentError::ValidationError(
                    "target weights must be non-negative".to_string(),
                ));
            }
            let sum: f64 = weights.values().sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(AgentError::ValidationError(format!(
                    "target weights sum to {:.3}, expected 1",
                    sum
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRow {
    pub asset_class: AssetClass,
    pub current_value: f64,
    pub current_percent: f64,
    pub target_percent: f64,
    /// current minus target, percentage points
    pub drift_percent: f64,
    /// Positive to buy, negative to sell
    pub suggested_change: f64,
}

/// Compare holdings against `targets`. Classes that appear on either side
/// get a row.
pub fn compare(
    holdings: &[Holding],
    targets: &BTreeMap<AssetClass, f64>,
) -> (f64, Vec<AllocationRow>) {
    let mut current: BTreeMap<AssetClass, f64> = BTreeMap::new();
    for holding in holdings {
        *current.entry(holding.asset_class).or_default() += holding.market_value();
    }
    let total: f64 = current.values().sum();

    let mut classes: Vec<AssetClass> = current.keys().chain(targets.keys()).copied().collect();
    classes.sort();
    classes.dedup();

    let rows = classes
        .into_iter()
        .map(|class| {
            let value = current.get(&class).copied().unwrap_or(0.0);
            let target = targets.get(&class).copied().unwrap_or(0.0);
            let current_percent = if total > 0.0 { value / total * 100.0 } else { 0.0 };

            AllocationRow {
                asset_class: class,
                current_value: round2(value),
                current_percent: round2(current_percent),
                target_percent: round2(target * 100.0),
                drift_percent: round2(current_percent - target * 100.0),
                suggested_change: round2(target * total - value),
            }
        })
        .collect();

    (total, rows)
}

pub struct AllocationOptimizerTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl AllocationOptimizerTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for AllocationOptimizerTool {
    fn name(&self) -> ToolName {
        ToolName::AllocationOptimizer
    }

    fn description(&self) -> &'static str {
        "Compare current asset-class allocation to a target mix or risk profile and suggest rebalancing amounts"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "targetWeights": {
                    "type": "object",
                    "description": "Fractions by asset class (equity, fixed_income, cash, real_estate, commodity, crypto) summing to 1",
                    "additionalProperties": { "type": "number", "minimum": 0 }
                },
                "riskProfile": { "type": "string", "enum": ["conservative", "moderate", "aggressive"] },
                "rebalanceThreshold": { "type": "number", "minimum": 0, "maximum": 100 }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: AllocationParams = parse_params(args)?;
        let holdings = self.source.holdings().await?;

        let (target_source, targets) = match params.target_weights {
            Some(weights) => ("custom", weights),
            None => (
                params.risk_profile.as_str(),
                params.risk_profile.target_weights(),
            ),
        };

        let (total, rows) = compare(&holdings, &targets);
        let max_drift = rows
            .iter()
            .map(|r| r.drift_percent.abs())
            .fold(0.0, f64::max);

        Ok(json!({
            "totalValue": round2(total),
            "targetSource": target_source,
            "allocation": rows,
            "maxDriftPercent": max_drift,
            "needsRebalance": total > 0.0 && max_drift > params.rebalance_threshold,
        }))
    }
}
