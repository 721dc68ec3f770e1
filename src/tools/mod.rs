//! Tool trait and registry
//!
//! Tools are read-only, deterministic views over the user's portfolio
//! data. The registry is keyed by `ToolName`, so the orchestrator never
//! depends on a schema library: each tool publishes a JSON schema for the
//! model and parses its own typed parameters before executing.

pub mod allocation;
pub mod compliance;
pub mod data;
pub mod market;
pub mod portfolio;
pub mod tax;
pub mod transactions;

pub use data::{HttpDataSource, InMemoryDataSource, PortfolioDataSource};

use crate::error::AgentError;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    PortfolioSummary,
    TransactionAnalyzer,
    MarketContext,
    TaxEstimator,
    ComplianceChecker,
    AllocationOptimizer,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::PortfolioSummary,
        ToolName::TransactionAnalyzer,
        ToolName::MarketContext,
        ToolName::TaxEstimator,
        ToolName::ComplianceChecker,
        ToolName::AllocationOptimizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::PortfolioSummary => "portfolio_summary",
            ToolName::TransactionAnalyzer => "transaction_analyzer",
            ToolName::MarketContext => "market_context",
            ToolName::TaxEstimator => "tax_estimator",
            ToolName::ComplianceChecker => "compliance_checker",
            ToolName::AllocationOptimizer => "allocation_optimizer",
        }
    }
}

impl FromStr for ToolName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| AgentError::ToolNotFound(s.to_string()))
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the model sees of a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A single read-only tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let name = name.parse::<ToolName>().ok()?;
        self.tools.get(&name).cloned()
    }

    pub fn list(&self) -> Vec<ToolName> {
        self.tools.keys().copied().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed parameters a tool accepts
pub trait ToolParams: DeserializeOwned {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Parse and validate tool arguments. `null` is read as `{}`.
pub fn parse_params<P: ToolParams>(args: &Value) -> Result<P> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => args.clone(),
        _ => {
            return Err(AgentError::ValidationError(
                "tool arguments must be a JSON object".to_string(),
            ))
        }
    };

    let params: P = serde_json::from_value(args)
        .map_err(|e| AgentError::ValidationError(format!("Invalid tool arguments: {}", e)))?;
    params.validate()?;
    Ok(params)
}

/// Round to cents for presentation in tool payloads
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Create the registry with all six portfolio tools over `source`.
pub fn create_default_registry(source: Arc<dyn PortfolioDataSource>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(portfolio::PortfolioSummaryTool::new(source.clone())));
    registry.register(Arc::new(transactions::TransactionAnalyzerTool::new(source.clone())));
    registry.register(Arc::new(market::MarketContextTool::new(source.clone())));
    registry.register(Arc::new(tax::TaxEstimatorTool::new(source.clone())));
    registry.register(Arc::new(compliance::ComplianceCheckerTool::new(source.clone())));
    registry.register(Arc::new(allocation::AllocationOptimizerTool::new(source)));

    registry
}
