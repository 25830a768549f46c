use crate::config::Config;
use anyhow::{Context, Result};

pub struct ValidationReport {
    pub environment: bool,
    pub processor: bool,
    pub webhook: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Webhook problems are warnings: the payment routes still work without them.
    pub fn is_valid(&self) -> bool {
        self.environment && self.processor
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Processor Settings:    {}", status(self.processor));
        println!("Webhook Settings:      {}", status(self.webhook));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }
        if !self.warnings.is_empty() {
            println!("\nWarnings:");
            for warning in &self.warnings {
                println!("  ⚠️  {}", warning);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

/// Checks the loaded configuration without contacting the processor.
pub fn validate_environment(config: &Config) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        processor: true,
        webhook: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_processor(config) {
        report.processor = false;
        report.errors.push(format!("Processor: {}", e));
    }

    if config.webhook_secret.is_none() {
        report.webhook = false;
        report
            .warnings
            .push("STRIPE_WEBHOOK_SECRET is not set; /webhook will reject every event".to_string());
    } else if config.webhook_tolerance_secs <= 0 {
        report.webhook = false;
        report
            .warnings
            .push("WEBHOOK_TOLERANCE_SECS must be positive".to_string());
    }

    if config.default_reader_id.is_none() {
        report
            .warnings
            .push("READER_ID is not set; every request must name its reader".to_string());
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.api_key.is_none() {
        anyhow::bail!("API_KEY is not set");
    }
    if config.server_port == 0 {
        anyhow::bail!("PORT must be greater than 0");
    }
    if config.default_currency.len() != 3 {
        anyhow::bail!("DEFAULT_CURRENCY must be a three-letter code");
    }
    Ok(())
}

fn validate_processor(config: &Config) -> Result<()> {
    if config.processor_secret_key.is_none() {
        anyhow::bail!("STRIPE_SECRET_KEY is not set");
    }
    url::Url::parse(&config.processor_base_url)
        .context("STRIPE_API_BASE is not a valid URL")?;
    Ok(())
}
