//! Plan command - Preview the decisions of a sync run
//!
//! Builds the same plan `tidesync sync` would execute, prints it and exits.
//! Nothing is transferred, deleted or persisted.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tracing::info;

use tidesync_core::domain::{MixedState, TriggerSource};
use tidesync_sync::plan::PlanOutcome;

use super::{build_engine, load_valid_config, parse_folder};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Only plan keys under this folder of the local tree
    #[arg(long)]
    pub folder: Option<String>,

    /// List skipped keys too, not only the ones that change
    #[arg(long)]
    pub all: bool,
}

impl PlanCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = load_valid_config(config_path)?;
        let folder = parse_folder(self.folder.as_deref())?;

        let engine = build_engine(&config).await?;
        let outcome = engine
            .plan(TriggerSource::DryRun, folder.as_ref())
            .await
            .context("Failed to build the sync plan")?;

        info!(
            keys = outcome.plan.len(),
            touched = outcome.touched_keys.len(),
            "Plan built"
        );

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&self.to_json(&outcome));
        } else {
            self.print_human(&outcome, formatter.as_ref());
        }
        Ok(())
    }

    fn listed_keys<'a>(&self, outcome: &'a PlanOutcome) -> Vec<&'a MixedState> {
        outcome
            .sorted_keys
            .iter()
            .rev()
            .filter_map(|key| outcome.plan.get(key))
            .filter(|state| self.all || state.is_touched())
            .collect()
    }

    fn to_json(&self, outcome: &PlanOutcome) -> serde_json::Value {
        let keys: Vec<_> = self
            .listed_keys(outcome)
            .into_iter()
            .map(|state| {
                json!({
                    "key": state.key.as_str(),
                    "decision": state.decision.map(|d| d.as_str()),
                    "rule": state.trace.as_ref().map(|t| t.rule),
                })
            })
            .collect();
        let oversized: Vec<_> = outcome
            .oversized_conflicts
            .iter()
            .map(|state| {
                json!({
                    "key": state.key.as_str(),
                    "decision": state.decision.map(|d| d.as_str()),
                    "size_local": state.size_local,
                    "size_remote": state.size_remote,
                })
            })
            .collect();

        json!({
            "total_keys": outcome.plan.len(),
            "touched_keys": outcome.touched_keys.len(),
            "keys": keys,
            "decisions": outcome.decision_counts(),
            "deletions": outcome.deletions,
            "oversized_conflicts": oversized,
        })
    }

    fn print_human(&self, outcome: &PlanOutcome, formatter: &dyn OutputFormatter) {
        let listed = self.listed_keys(outcome);
        if outcome.touched_keys.is_empty() {
            formatter.success(&format!(
                "Already up to date ({} keys checked)",
                outcome.plan.len()
            ));
        } else {
            formatter.success(&format!(
                "{} of {} keys would change",
                outcome.touched_keys.len(),
                outcome.plan.len()
            ));
        }

        if !listed.is_empty() {
            formatter.info("");
            for state in listed {
                let decision = state.decision.map(|d| d.as_str()).unwrap_or("undecided");
                formatter.info(&format!("{decision:<34} {}", state.key));
            }
        }

        formatter.info("");
        for (decision, count) in outcome.decision_counts() {
            formatter.info(&format!("{decision:<34} {count}"));
        }

        for state in &outcome.oversized_conflicts {
            formatter.warn(&format!(
                "{} is too large to sync and conflicts with the other side",
                state.key
            ));
        }
    }
}
