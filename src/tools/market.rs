//! `market_context`: latest quotes and their freshness

use super::{parse_params, round2, PortfolioDataSource, Tool, ToolName, ToolParams};
use crate::error::AgentError;
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Field carrying quote staleness in the tool result
pub const DATA_AGE_FIELD: &str = "dataAgeMinutes";

const MAX_SYMBOLS: usize = 25;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarketContextParams {
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl ToolParams for MarketContextParams {
    fn validate(&self) -> Result<()> {
        if self.symbols.len() > MAX_SYMBOLS {
            return Err(AgentError::ValidationError(format!(
                "At most {} symbols per request",
                MAX_SYMBOLS
            )));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(AgentError::ValidationError("Empty symbol".to_string()));
        }
        Ok(())
    }
}

pub struct MarketContextTool {
    source: Arc<dyn PortfolioDataSource>,
}

impl MarketContextTool {
    pub fn new(source: Arc<dyn PortfolioDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Tool for MarketContextTool {
    fn name(&self) -> ToolName {
        ToolName::MarketContext
    }

    fn description(&self) -> &'static str {
        "Latest quotes and daily change for the given symbols, or for every holding when none are given"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbols": {
                    "type": "array",
                    "items": { "type": "string" },
                    "maxItems": MAX_SYMBOLS
                }
            }
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let params: MarketContextParams = parse_params(args)?;
        let symbols: Vec<String> = params
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect();

        let quotes = self.source.quotes(&symbols).await?;
        let now = Utc::now();

        let oldest = quotes.iter().map(|q| q.as_of).min();
        let data_age_minutes = oldest
            .map(|as_of| (now - as_of).num_seconds().max(0) as f64 / 60.0)
            .unwrap_or(0.0);

        let missing: Vec<&String> = symbols
            .iter()
            .filter(|s| !quotes.iter().any(|q| q.symbol.eq_ignore_ascii_case(s)))
            .collect();

        let rows: Vec<Value> = quotes
            .iter()
            .map(|q| {
                json!({
                    "symbol": q.symbol,
                    "price": q.price,
                    "previousClose": q.previous_close,
                    "changePercent": round2(q.change_percent()),
                    "asOf": q.as_of,
                })
            })
            .collect();

        Ok(json!({
            "quotes": rows,
            "missingSymbols": missing,
            DATA_AGE_FIELD: round2(data_age_minutes),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InMemoryDataSource;
    use chrono::Duration;

    #[tokio::test]
    async fn test_quotes_and_age() {
        let as_of = Utc::now() - Duration::minutes(55);
        let tool = MarketContextTool::new(Arc::new(InMemoryDataSource::sample(as_of)));

        let out = tool.execute(&json!({ "symbols": ["aapl", "XYZ"] })).await.unwrap();
        assert_eq!(out["quotes"].as_array().unwrap().len(), 1);
        assert_eq!(out["quotes"][0]["changePercent"], json!(1.01));
        assert_eq!(out["missingSymbols"], json!(["XYZ"]));

        // sample quotes are stamped five minutes before `as_of`
        let age = out[DATA_AGE_FIELD].as_f64().unwrap();
        assert!((59.9..61.0).contains(&age), "age {}", age);
    }

    #[tokio::test]
    async fn test_too_many_symbols() {
        let tool = MarketContextTool::new(Arc::new(InMemoryDataSource::default()));
        let symbols: Vec<String> = (0..30).map(|i| format!("S{}", i)).collect();
        let result = tool.execute(&json!({ "symbols": symbols })).await;
        assert!(matches!(result, Err(AgentError::ValidationError(_))));
    }
}
