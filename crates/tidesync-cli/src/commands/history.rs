//! History command - List recently persisted plans

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use tidesync_core::domain::SyncPlan;
use tidesync_core::ports::HistoryStore;

use super::{load_valid_config, open_history};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Number of plans to show, newest first
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

fn plan_summary(plan: &SyncPlan) -> serde_json::Value {
    let touched = plan
        .mixed_states
        .values()
        .filter(|state| state.is_touched())
        .count();
    json!({
        "timestamp": plan.timestamp.to_rfc3339(),
        "trigger_source": plan.trigger_source.as_str(),
        "total_keys": plan.len(),
        "touched_keys": touched,
        "decisions": plan.decision_counts(),
    })
}

impl HistoryCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let config = load_valid_config(config_path)?;
        let history = open_history(&config).await?;

        let plans = history
            .recent_plans(self.limit)
            .await
            .context("Failed to read plan history")?;

        if matches!(format, OutputFormat::Json) {
            let summaries: Vec<_> = plans.iter().map(plan_summary).collect();
            formatter.print_json(&json!({ "plans": summaries }));
            return Ok(());
        }

        if plans.is_empty() {
            formatter.info("No plans recorded yet");
            return Ok(());
        }

        formatter.success(&format!(
            "{} most recent plan{}",
            plans.len(),
            if plans.len() == 1 { "" } else { "s" }
        ));
        for plan in &plans {
            let summary = plan_summary(plan);
            formatter.info("");
            formatter.info(&format!(
                "{}  {:<10} {} of {} keys changed",
                plan.timestamp.format("%Y-%m-%d %H:%M:%S"),
                plan.trigger_source.as_str(),
                summary["touched_keys"],
                plan.len()
            ));
            for (decision, count) in plan.decision_counts() {
                formatter.info(&format!("    {decision:<34} {count}"));
            }
        }
        Ok(())
    }
}
