//! # Chat Gateway
//!
//! Entry point: initializes tracing, loads configuration, and runs the
//! WebSocket gateway server.

use anyhow::Result;
use tracing::info;

use chat_gateway::config::Settings;
use chat_gateway::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    chat_gateway::telemetry::init_tracing();

    info!("Starting Chat Gateway...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
