use clap::{Parser, Subcommand};
use crate::config::Config;
use crate::startup::validate_environment;
use crate::utils::redact_opt;

#[derive(Parser)]
#[command(name = "terminal-bridge")]
#[command(about = "Terminal Bridge - card-present payment proxy for smart readers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Configuration validation
    Config,
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Port: {}", config.server_port);
    println!("  API Key: {}", redact_opt(config.api_key.as_deref()));
    println!("  Processor URL: {}", config.processor_base_url);
    println!(
        "  Processor Secret Key: {}",
        redact_opt(config.processor_secret_key.as_deref())
    );
    println!("  Default Reader: {}", redact_opt(config.default_reader_id.as_deref()));
    println!("  Default Currency: {}", config.default_currency);
    println!(
        "  Polling: every {}s, at most {} attempts",
        config.poll_interval_secs, config.poll_max_attempts
    );

    let report = validate_environment(config);
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid: {}", report.errors.join("; "));
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_default_command() {
        let cli = Cli::parse_from(["terminal-bridge"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parses_config_command() {
        let cli = Cli::parse_from(["terminal-bridge", "config"]);
        assert!(matches!(cli.command, Some(Commands::Config)));
    }

    #[test]
    fn test_config_validate_rejects_missing_keys() {
        assert!(handle_config_validate(&Config::default()).is_err());
    }
}
