use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use terminal_bridge::cli::{handle_config_validate, Cli, Commands};
use terminal_bridge::config::Config;
use terminal_bridge::processor::StripeClient;
use terminal_bridge::startup::validate_environment;
use terminal_bridge::{create_app, AppState};

fn init_tracing() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => handle_config_validate(&config),
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let report = validate_environment(&config);
    for error in &report.errors {
        tracing::warn!("{}", error);
    }
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }

    let gateway = Arc::new(StripeClient::new(
        config.processor_base_url.clone(),
        config.processor_secret_key.clone(),
    ));
    tracing::info!("Processor client initialized with URL: {}", config.processor_base_url);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let app = create_app(AppState::new(config, gateway));

    tracing::info!("listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
