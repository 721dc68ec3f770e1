//! `transaction_analyzer`: activity counts and volumes over a window

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::error::AgentError;
use crate::models::ActivityType;
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionAnalyzerParams {
    pub symbol: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub activity_type: Option<ActivityType>,
}

impl ToolParams for TransactionAnalyzerParams {
    fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(AgentError::ValidationError(format!(
                    "startDate {} is after endDate {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct SymbolStats {
    buys: usize,
    sells: usize,
    bought: f64,
    sold: f64,
}

pub struct TransactionAnalyzerTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl TransactionAnalyzerTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for TransactionAnalyzerTool {
    fn name(&self) -> ToolName {
        ToolName::TransactionAnalyzer
    }

    fn description(&self) -> &'static str {
        "Analyze recorded buy/sell/dividend/fee activity, optionally filtered by symbol, dates and type"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "startDate": { "type": "string", "format": "date" },
                "endDate": { "type": "string", "format": "date" },
                "activityType": { "type": "string", "enum": ["BUY", "SELL", "DIVIDEND", "FEE"] }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: TransactionAnalyzerParams = parse_params(args)?;
        let activities = self.source.activities().await?;

        let selected: Vec<_> = activities
            .iter()
            .filter(|a| {
                params
                    .symbol
                    .as_deref()
                    .map_or(true, |s| a.symbol.eq_ignore_ascii_case(s))
                    && params.start_date.map_or(true, |d| a.date >= d)
                    && params.end_date.map_or(true, |d| a.date <= d)
                    && params.activity_type.map_or(true, |t| a.activity_type == t)
            })
            .collect();

        let mut by_symbol: BTreeMap<&str, SymbolStats> = BTreeMap::new();
        let mut buy_volume = 0.0;
        let mut sell_volume = 0.0;
        let mut dividends = 0.0;
        let mut fees = 0.0;

        for activity in &selected {
            let amount = activity.gross_amount();
            fees += activity.fee;
            let stats = by_symbol.entry(activity.symbol.as_str()).or_default();

            match activity.activity_type {
                ActivityType::Buy => {
                    buy_volume += amount;
                    stats.buys += 1;
                    stats.bought += amount;
                }
                ActivityType::Sell => {
                    sell_volume += amount;
                    stats.sells += 1;
                    stats.sold += amount;
                }
                ActivityType::Dividend => dividends += amount,
                ActivityType::Fee => fees += amount,
            }
        }

        let symbols: Vec<Value> = by_symbol
            .into_iter()
            .map(|(symbol, stats)| {
                json!({
                    "symbol": symbol,
                    "buys": stats.buys,
                    "sells": stats.sells,
                    "buyVolume": round2(stats.bought),
                    "sellVolume": round2(stats.sold),
                })
            })
            .collect();

        Ok(json!({
            "transactionCount": selected.len(),
            "buyVolume": round2(buy_volume),
            "sellVolume": round2(sell_volume),
            "dividendIncome": round2(dividends),
            "totalFees": round2(fees),
            "firstDate": selected.iter().map(|a| a.date).min(),
            "lastDate": selected.iter().map(|a| a.date).max(),
            "bySymbol": symbols,
        }))
    }
}
