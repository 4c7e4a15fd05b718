use std::io::Write;

use tidesync_core::domain::{Decision, MixedState, SyncKey};
use tidesync_core::ports::SyncObserver;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn print_json(&self, _value: &serde_json::Value) {}
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!(
            "{}",
            serde_json::json!({"success": true, "message": message})
        );
    }
    fn error(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"success": false, "error": message})
        );
    }
    fn warn(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"level": "warning", "message": message})
        );
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }
}

pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(HumanFormatter)
    }
}

/// Prints one line per dispatched key and every conflict on stderr
///
/// Silent in JSON mode so stdout stays machine-readable.
pub struct ProgressPrinter {
    enabled: bool,
}

impl ProgressPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            enabled: format == OutputFormat::Human,
        }
    }
}

impl SyncObserver for ProgressPrinter {
    fn on_progress(&self, index: usize, total: usize, key: &SyncKey, decision: Decision) {
        if self.enabled {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "  [{index}/{total}] {:<34} {key}", decision.as_str());
        }
    }

    fn on_sizes_conflict(&self, conflicts: &[MixedState]) {
        if !self.enabled {
            return;
        }
        for state in conflicts {
            if let Some(decision) = state.decision {
                eprintln!("\u{26a0} {key}: {decision}", key = state.key);
            }
        }
    }

    fn on_conflict_detected(&self, key: &SyncKey) {
        if self.enabled {
            eprintln!("\u{26a0} {key} changed on both sides, kept a conflicted copy");
        }
    }
}
