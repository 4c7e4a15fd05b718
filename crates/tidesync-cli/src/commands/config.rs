//! Config command - View and check TideSync configuration
//!
//! `tidesync config show` prints the effective configuration (YAML or JSON);
//! `tidesync config validate` loads the file strictly and lists every error.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use tidesync_core::config::Config;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
}

/// Result of strictly loading and validating a configuration file
#[derive(Debug, PartialEq)]
enum ValidationOutcome {
    Missing,
    Unparsable(String),
    Checked(Vec<String>),
}

fn check_config(config_path: &Path) -> ValidationOutcome {
    if !config_path.exists() {
        return ValidationOutcome::Missing;
    }
    match Config::load(config_path) {
        Ok(config) => ValidationOutcome::Checked(
            config.validate().iter().map(ToString::to_string).collect(),
        ),
        Err(e) => ValidationOutcome::Unparsable(format!("{e:#}")),
    }
}

impl ConfigCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(config_path, format),
            ConfigCommand::Validate => self.execute_validate(config_path, format),
        }
    }

    fn execute_show(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = Config::load_or_default(config_path);

        info!(config_path = %config_path.display(), "Showing configuration");

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", config_path.display()));
            formatter.info("");
            let yaml = config
                .to_yaml()
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    fn execute_validate(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let outcome = check_config(config_path);

        info!(config_path = %config_path.display(), "Validating configuration");

        if matches!(format, OutputFormat::Json) {
            let (valid, errors) = match &outcome {
                ValidationOutcome::Missing => (
                    false,
                    vec!["Configuration file not found. Using defaults.".to_string()],
                ),
                ValidationOutcome::Unparsable(e) => {
                    (false, vec![format!("Failed to parse configuration: {e}")])
                }
                ValidationOutcome::Checked(errors) => (errors.is_empty(), errors.clone()),
            };
            formatter.print_json(&serde_json::json!({
                "valid": valid,
                "config_path": config_path.display().to_string(),
                "errors": errors,
            }));
            return Ok(());
        }

        match outcome {
            ValidationOutcome::Missing => {
                formatter.info(&format!(
                    "Configuration file not found at {}",
                    config_path.display()
                ));
                formatter.info("Using default configuration.");
            }
            ValidationOutcome::Unparsable(e) => {
                formatter.error(&format!("Failed to parse configuration: {e}"));
                formatter.info(&format!("File: {}", config_path.display()));
            }
            ValidationOutcome::Checked(errors) if errors.is_empty() => {
                formatter.success("Configuration is valid");
                formatter.info(&format!("File: {}", config_path.display()));
            }
            ValidationOutcome::Checked(errors) => {
                formatter.error(&format!(
                    "Configuration has {} error{}:",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" }
                ));
                formatter.info(&format!("File: {}", config_path.display()));
                formatter.info("");
                for error in &errors {
                    formatter.info(&format!("  {error}"));
                }
            }
        }

        Ok(())
    }
}
