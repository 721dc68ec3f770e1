use chrono::Utc;
use portfolio_agent::{
    agent::Orchestrator,
    api::start_server,
    budget::SpendTracker,
    config::{server_port, AgentConfig},
    llm::GeminiGenerator,
    state::InMemoryConversationStore,
    tools::{create_default_registry, HttpDataSource, InMemoryDataSource, PortfolioDataSource},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;

    let api_port = server_port()?;

    info!("Portfolio Agent - API Server");
    info!(
        port = api_port,
        max_retries = config.max_retries,
        max_steps = config.max_steps,
        timeout_secs = config.attempt_timeout.as_secs(),
        daily_budget_usd = config.daily_budget_usd,
        "Configuration loaded"
    );

    let source: Arc<dyn PortfolioDataSource> = match HttpDataSource::from_env() {
        Some(source) => Arc::new(source),
        None => {
            warn!("FINANCIAL_API_BASE_URL not set, serving the sample portfolio");
            Arc::new(InMemoryDataSource::sample(Utc::now()))
        }
    };

    let generator = GeminiGenerator::from_env()?;
    info!(model = %generator.model(), "Model boundary ready");

    let store = Arc::new(InMemoryConversationStore::new());
    let spend = Arc::new(SpendTracker::from_config(&config));

    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(generator),
            Arc::new(create_default_registry(source)),
            config,
        )
        .with_spend_tracker(spend)
        .with_store(store.clone()),
    );

    info!("Orchestrator initialized");

    start_server(orchestrator, store, api_port).await?;

    Ok(())
}
