use chrono::Utc;
use portfolio_agent::{
    agent::Orchestrator,
    config::AgentConfig,
    llm::{GeminiGenerator, ModelStep, ScriptedGenerator, TextGenerator},
    models::ToolCallRequest,
    tools::{create_default_registry, HttpDataSource, InMemoryDataSource, PortfolioDataSource},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_QUESTION: &str = "How is my portfolio doing?";

/// Offline stand-in used when no model API key is configured
fn demo_generator() -> ScriptedGenerator {
    ScriptedGenerator::new(vec![
        ModelStep::calls(vec![ToolCallRequest {
            call_id: "demo-1".to_string(),
            tool_name: "portfolio_summary".to_string(),
            args: json!({ "includeHoldings": true }),
        }]),
        ModelStep::answer(
            "Your portfolio is worth $19,750.00 against a cost basis of $16,000.00, \
             an unrealized gain of $3,750.00 or 23.44%.",
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let question = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            DEFAULT_QUESTION.to_string()
        } else {
            args.join(" ")
        }
    };

    let config = AgentConfig::from_env()?;

    let source: Arc<dyn PortfolioDataSource> = match HttpDataSource::from_env() {
        Some(source) => Arc::new(source),
        None => Arc::new(InMemoryDataSource::sample(Utc::now())),
    };

    let generator: Arc<dyn TextGenerator> = match GeminiGenerator::from_env() {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            warn!("{}; using the offline demo script", e);
            Arc::new(demo_generator())
        }
    };

    let registry = Arc::new(create_default_registry(source));
    let orchestrator = Orchestrator::new(generator, registry, config);

    info!(question = %question, "Running orchestrator");

    match orchestrator.chat(&[], &question).await {
        Ok(response) => {
            println!("\n{}\n", response.message);
            println!("Confidence: {:.2}", response.confidence);
            println!(
                "Tokens: {} prompt / {} completion",
                response.usage.prompt_tokens, response.usage.completion_tokens
            );
            if !response.tool_calls.is_empty() {
                println!("\nTools:");
                for call in &response.tool_calls {
                    let status = if call.is_error() { "error" } else { "ok" };
                    println!("  {} ({} ms, {})", call.tool_name, call.duration_ms, status);
                }
            }
            for caveat in &response.disclaimers {
                println!("  * {}", caveat);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Chat failed ({}): {}", e.kind(), e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
