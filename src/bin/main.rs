use stock_assistant_orchestrator::{bootstrap::build_orchestrator, config::Config, TurnStatus};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run one prompt (or several, separated by `;`) through the orchestrator
/// on a single thread and print each reply.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let input = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if input.trim().is_empty() {
        eprintln!("usage: assistant <prompt>[; <follow-up> ...]");
        eprintln!("example: assistant \"MSFT history from 2024-01-01 to 2024-01-05; show last history\"");
        std::process::exit(2);
    }

    let config = Config::from_env()?;
    let orchestrator = build_orchestrator(&config)?;
    let thread_id = format!("cli-{}", uuid::Uuid::new_v4());
    info!(thread_id = %thread_id, "Running prompts");

    let mut failed = false;
    for prompt in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let reply = orchestrator.handle_turn(&thread_id, prompt).await;

        println!("\n> {}", prompt);
        println!("{}", reply.response);
        println!("\nInvoked: {}", reply.invoked.join(", "));
        println!("Policy: {} ({} ms)", reply.policy_version, reply.execution_time_ms);
        println!("Trace:");
        for (i, step) in reply.reasoning_trace.iter().enumerate() {
            println!("  {}: {}", i + 1, step);
        }

        failed |= reply.status == TurnStatus::OracleFailed;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
