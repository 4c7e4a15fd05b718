//! Sync command - Synchronize the local tree with the remote
//!
//! Provides the `tidesync sync` CLI command which:
//! 1. Loads and validates the configuration
//! 2. Opens the history database and creates the adapters
//! 3. Runs the SyncEngine with a progress printer attached
//! 4. Displays the run report

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Args;
use tracing::info;

use tidesync_core::domain::TriggerSource;
use tidesync_sync::{SyncError, SyncOptions, SyncReport};

use super::{build_engine, load_valid_config, parse_folder};
use crate::output::{get_formatter, OutputFormat, OutputFormatter, ProgressPrinter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Proceed even when more keys would change than the protection threshold allows
    #[arg(long)]
    pub force: bool,

    /// Maximum in-flight operations (1 runs every key one after another)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Only sync keys under this folder of the local tree
    #[arg(long)]
    pub folder: Option<String>,

    /// Trigger recorded with the plan: manual, scheduled or on_save
    #[arg(long)]
    pub trigger: Option<String>,
}

/// Parses a `--trigger` value; dry runs go through `tidesync plan` instead
fn parse_trigger(raw: &str) -> Result<TriggerSource> {
    match TriggerSource::parse(raw) {
        Some(TriggerSource::DryRun) => Err(anyhow!(
            "'dry_run' cannot execute a sync; use 'tidesync plan'"
        )),
        Some(source) => Ok(source),
        None => Err(anyhow!(
            "unknown trigger '{raw}' (expected manual, scheduled or on_save)"
        )),
    }
}

impl SyncCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = load_valid_config(config_path)?;

        let trigger_source = match &self.trigger {
            Some(raw) => parse_trigger(raw)?,
            None => config.sync.default_trigger,
        };
        let options = SyncOptions {
            force: self.force,
            concurrency: self.concurrency.map(usize::from),
            watched_root: parse_folder(self.folder.as_deref())?,
            trigger_source,
        };

        formatter.info(&format!(
            "Syncing {} with {}",
            config.sync.local_root.display(),
            config.sync.remote_root.display()
        ));

        let engine = build_engine(&config)
            .await?
            .with_observer(Arc::new(ProgressPrinter::new(format)));

        match engine.sync(options).await {
            Ok(report) => {
                info!(
                    touched = report.touched_keys,
                    duration_ms = report.duration_ms,
                    "Sync finished"
                );
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::to_value(&report)?);
                } else {
                    print_report(&report, formatter.as_ref());
                }
                Ok(())
            }
            Err(e) => {
                formatter.error(&e.to_string());
                if let SyncError::Execution(_) = e {
                    formatter.info("Completed steps are kept; running sync again resumes.");
                }
                Err(e.into())
            }
        }
    }
}

fn print_report(report: &SyncReport, formatter: &dyn OutputFormatter) {
    let duration_display = if report.duration_ms >= 1000 {
        format!("{:.1}s", report.duration_ms as f64 / 1000.0)
    } else {
        format!("{}ms", report.duration_ms)
    };

    if report.touched_keys == 0 {
        formatter.success(&format!(
            "Already up to date ({} keys checked)",
            report.total_keys
        ));
    } else {
        formatter.success(&format!("Sync completed in {duration_display}"));
    }

    let execution = &report.execution;
    for (label, count) in [
        ("Folders created:", execution.folders_created),
        ("Deletions:", execution.deletions),
        ("Transfers:", execution.transfers),
    ] {
        if count > 0 {
            formatter.info(&format!("{label:<17} {count}"));
        }
    }
    if report.metadata_updated {
        formatter.info("Remote deletion list updated");
    }
}
