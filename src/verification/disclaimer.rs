//! Compliance disclaimers
//!
//! `enforce` guarantees the footer exactly once; contextual caveats are
//! looked up per tool that actually ran in the turn.

use crate::tools::ToolName;
use regex::Regex;
use std::sync::LazyLock;

pub const DISCLAIMER: &str = "This information is for educational purposes only and is not \
financial advice. Consult a qualified financial advisor before making investment decisions.";

const RULE: &str = "\n\n---\n\n";

static DISCLAIMER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)financial advice|\bconsult\b[^.!?\n]{0,60}\badvis[oe]r|educational purposes|\bnot\b[^.!?\n]{0,40}\ba recommendation",
    )
    .expect("disclaimer regex is valid")
});

/// Append the compliance footer unless the text already carries one.
pub fn enforce(text: &str) -> String {
    if has_disclaimer(text) {
        return text.to_string();
    }

    let body = text.trim_end();
    format!("{}{}*{}*", body, RULE, DISCLAIMER)
}

pub fn has_disclaimer(text: &str) -> bool {
    DISCLAIMER_PATTERN.is_match(text)
}

/// Caveat attached when `tool` contributed to an answer
pub fn contextual_disclaimer(tool: ToolName) -> &'static str {
    match tool {
        ToolName::PortfolioSummary => {
            "Portfolio values use the latest available prices and may lag real-time markets."
        }
        ToolName::TransactionAnalyzer => {
            "Transaction analysis covers only activity recorded in your account history."
        }
        ToolName::MarketContext => {
            "Market data may be delayed and should not be used for time-sensitive trading."
        }
        ToolName::TaxEstimator => {
            "Tax estimates use simplified FIFO lot matching and flat rates; consult a tax professional for filing."
        }
        ToolName::ComplianceChecker => {
            "Compliance checks apply generic concentration rules, not your institution's policies."
        }
        ToolName::AllocationOptimizer => {
            "Allocation suggestions are model outputs based on target weights, not personalized recommendations."
        }
    }
}

/// Caveats for the tools invoked in a turn, deduplicated in first-use
/// order. Unknown tool names are skipped.
pub fn contextual_disclaimers<'a, I>(tool_names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<ToolName> = Vec::new();

    for name in tool_names {
        if let Ok(tool) = name.parse::<ToolName>() {
            if !seen.contains(&tool) {
                seen.push(tool);
            }
        }
    }

    seen.into_iter()
        .map(|tool| contextual_disclaimer(tool).to_string())
        .collect()
}
