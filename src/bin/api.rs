use stock_assistant_orchestrator::{api::start_server, bootstrap::build_orchestrator, config::Config};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    info!("Stock Assistant Orchestrator - API Server");
    info!(port = config.port, model = %config.gemini_model, "Configuration loaded");

    let orchestrator = Arc::new(build_orchestrator(&config)?);

    // Idle-thread sweeper
    let sweeper = {
        let orchestrator = Arc::clone(&orchestrator);
        let every = config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.evict_idle();
            }
        })
    };

    info!("Orchestrator initialized, starting API server");
    let result = start_server(orchestrator, config.port).await;
    sweeper.abort();
    result
}
