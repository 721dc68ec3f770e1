//! Core data models for the portfolio agent

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A prior turn supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

//
// ================= Model I/O =================
//

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// Message history as seen by the model boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },
}

impl From<&ChatMessage> for AgentMessage {
    fn from(message: &ChatMessage) -> Self {
        match message.role {
            MessageRole::User => AgentMessage::User {
                text: message.content.clone(),
            },
            MessageRole::Assistant => AgentMessage::Assistant {
                text: message.content.clone(),
                tool_calls: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

//
// ================= Tool Execution =================
//

/// One executed tool call within a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

//
// ================= Chat Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub confidence: f64,
    pub disclaimer: String,
    pub disclaimers: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub duration_ms: u64,
}

//
// ================= Portfolio Data =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityType {
    Buy,
    Sell,
    Dividend,
    Fee,
}

/// A brokerage activity from the user's history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub symbol: String,
    pub activity_type: ActivityType,
    pub date: NaiveDate,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub fee: f64,
}

impl Activity {
    pub fn gross_amount(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    FixedIncome,
    Cash,
    RealEstate,
    Commodity,
    Crypto,
}

/// A current position
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub market_price: f64,
    pub asset_class: AssetClass,
    pub sector: Option<String>,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.market_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub previous_close: f64,
    pub as_of: DateTime<Utc>,
}

impl Quote {
    pub fn change_percent(&self) -> f64 {
        if self.previous_close.abs() < f64::EPSILON {
            return 0.0;
        }
        (self.price - self.previous_close) / self.previous_close * 100.0
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityType::Buy => "BUY",
            ActivityType::Sell => "SELL",
            ActivityType::Dividend => "DIVIDEND",
            ActivityType::Fee => "FEE",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Equity => "equity",
            AssetClass::FixedIncome => "fixed_income",
            AssetClass::Cash => "cash",
            AssetClass::RealEstate => "real_estate",
            AssetClass::Commodity => "commodity",
            AssetClass::Crypto => "crypto",
        };
        write!(f, "{}", s)
    }
}
