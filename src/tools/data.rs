//! Portfolio data sources backing the tools
//!
//! Tools never fetch on their own; they read holdings, activities and
//! quotes through `PortfolioDataSource`.

use crate::error::AgentError;
use crate::models::{Activity, ActivityType, AssetClass, Holding, Quote};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Read-only access to the user's portfolio
#[async_trait]
pub trait PortfolioDataSource: Send + Sync {
    async fn holdings(&self) -> Result<Vec<Holding>>;
    async fn activities(&self) -> Result<Vec<Activity>>;
    /// Quotes for `symbols`; all held symbols when empty
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>>;
}

/// Fixed in-process data, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    pub holdings: Vec<Holding>,
    pub activities: Vec<Activity>,
    pub quotes: Vec<Quote>,
}

impl InMemoryDataSource {
    pub fn new(holdings: Vec<Holding>, activities: Vec<Activity>, quotes: Vec<Quote>) -> Self {
        Self {
            holdings,
            activities,
            quotes,
        }
    }

    /// A small three-position demo portfolio priced at `as_of`
    pub fn sample(as_of: DateTime<Utc>) -> Self {
        // (symbol, name, quantity, cost basis, price, class, sector)
        let positions = [
            ("AAPL", "Apple Inc.", 40.0, 5200.0, 190.0, AssetClass::Equity, Some("Technology")),
            (
                "VTI",
                "Vanguard Total Stock Market ETF",
                30.0,
                6300.0,
                260.0,
                AssetClass::Equity,
                Some("Broad Market"),
            ),
            (
                "BND",
                "Vanguard Total Bond Market ETF",
                60.0,
                4500.0,
                72.5,
                AssetClass::FixedIncome,
                None,
            ),
        ];

        let holdings: Vec<Holding> = positions
            .into_iter()
            .map(|(symbol, name, quantity, cost, price, class, sector)| Holding {
                symbol: symbol.to_string(),
                name: name.to_string(),
                quantity,
                cost_basis: cost,
                market_price: price,
                asset_class: class,
                sector: sector.map(str::to_string),
            })
            .collect();

        let activity = |symbol: &str, kind, (y, m, d): (i32, u32, u32), quantity, price| Activity {
            symbol: symbol.to_string(),
            activity_type: kind,
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default(),
            quantity,
            unit_price: price,
            fee: 0.0,
        };

        let activities = vec![
            activity("AAPL", ActivityType::Buy, (2023, 2, 14), 50.0, 130.0),
            activity("VTI", ActivityType::Buy, (2023, 6, 1), 30.0, 210.0),
            activity("BND", ActivityType::Buy, (2024, 1, 10), 60.0, 75.0),
            activity("AAPL", ActivityType::Sell, (2025, 4, 22), 10.0, 170.0),
            activity("VTI", ActivityType::Dividend, (2025, 6, 30), 30.0, 0.95),
        ];

        let quotes = holdings
            .iter()
            .map(|h| Quote {
                symbol: h.symbol.clone(),
                price: h.market_price,
                previous_close: h.market_price * 0.99,
                as_of: as_of - ChronoDuration::minutes(5),
            })
            .collect();

        Self::new(holdings, activities, quotes)
    }
}

#[async_trait]
impl PortfolioDataSource for InMemoryDataSource {
    async fn holdings(&self) -> Result<Vec<Holding>> {
        Ok(self.holdings.clone())
    }

    async fn activities(&self) -> Result<Vec<Activity>> {
        Ok(self.activities.clone())
    }

    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        Ok(self
            .quotes
            .iter()
            .filter(|q| {
                symbols.is_empty() || symbols.iter().any(|s| s.eq_ignore_ascii_case(&q.symbol))
            })
            .cloned()
            .collect())
    }
}

/// Financial data service reached over HTTP
#[derive(Clone)]
pub struct HttpDataSource {
    client: Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("FINANCIAL_API_BASE_URL").ok()?;
        Self::new(&base_url).ok()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching portfolio data");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                AgentError::ToolError(format!("Financial API request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::ToolError(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AgentError::ToolError(format!("Invalid JSON response: {}", e)))
    }
}

#[async_trait]
impl PortfolioDataSource for HttpDataSource {
    async fn holdings(&self) -> Result<Vec<Holding>> {
        self.get_json("/api/v1/portfolio/holdings", &[]).await
    }

    async fn activities(&self) -> Result<Vec<Activity>> {
        self.get_json("/api/v1/portfolio/activities", &[]).await
    }

    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        let query = if symbols.is_empty() {
            Vec::new()
        } else {
            vec![("symbols", symbols.join(","))]
        };
        self.get_json("/api/v1/market/quotes", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_quote_filter() {
        let source = InMemoryDataSource::sample(Utc::now());

        let all = source.quotes(&[]).await.unwrap();
        assert_eq!(all.len(), 3);

        let one = source.quotes(&["aapl".to_string()]).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].symbol, "AAPL");
    }

    #[test]
    fn test_http_source_trims_base_url() {
        let source = HttpDataSource::new("http://localhost:9000/").unwrap();
        assert_eq!(source.base_url, "http://localhost:9000");
    }
}
