//! Output formatting for the Netforge CLI.
//!
//! Human-facing run output goes through this formatter; diagnostic
//! detail goes through `tracing` and is controlled by verbosity.

use colored::Colorize;

use netforge::orchestrator::ExecutionPlan;
use netforge::state::{DeploymentState, ResourceKind};
use netforge::teardown::TeardownReport;
use netforge::topology::ValidationReport;

/// Formatter for terminal output with optional color.
pub struct OutputFormatter {
    use_color: bool,
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a formatter. Color is disabled by flag or by the
    /// `NO_COLOR` environment variable.
    pub fn new(use_color: bool, verbosity: u8) -> Self {
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        if !use_color {
            colored::control::set_override(false);
        }
        Self {
            use_color,
            verbosity,
        }
    }

    /// Print a banner line.
    pub fn banner(&self, text: &str) {
        if self.use_color {
            println!("{}", text.bold());
        } else {
            println!("{}", text);
        }
        println!("{}", "=".repeat(text.len()));
    }

    /// Print an informational line.
    pub fn info(&self, message: &str) {
        println!("{}", message);
    }

    /// Print a detail line, shown only at -v and above.
    pub fn detail(&self, message: &str) {
        if self.verbosity >= 1 {
            println!("  {}", message.dimmed());
        }
    }

    /// Print a warning line.
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }

    /// Print an error line.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    /// Print a success line.
    pub fn success(&self, message: &str) {
        println!("{} {}", "ok:".green().bold(), message);
    }

    /// Print every violation in a validation report.
    pub fn validation_failure(&self, report: &ValidationReport) {
        self.error(&format!(
            "topology validation failed with {} violation(s):",
            report.len()
        ));
        for violation in report.violations() {
            eprintln!("  - {}", violation.to_string().red());
        }
    }

    /// Print an execution plan, one numbered line per step.
    pub fn plan(&self, plan: &ExecutionPlan) {
        for (index, step) in plan.steps().iter().enumerate() {
            let deps = if step.depends_on.is_empty() {
                String::new()
            } else {
                format!(
                    "  (after: {})",
                    step.depends_on
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            println!(
                "{:>3}. {} {}{}",
                index + 1,
                kind_label(step.kind).cyan(),
                step.name,
                deps.dimmed()
            );
        }
    }

    /// Print the resources of a completed run.
    pub fn deployment(&self, state: &DeploymentState) {
        for resource in &state.resources {
            println!(
                "  {} {} {} {}",
                "created".green(),
                kind_label(resource.kind).cyan(),
                resource.logical_name,
                resource.remote_id.dimmed()
            );
        }
    }

    /// Print a teardown summary, listing anything left behind.
    pub fn teardown_summary(&self, report: &TeardownReport) {
        for name in &report.removed {
            println!("  {} {}", "removed".green(), name);
        }
        for name in &report.already_absent {
            println!("  {} {}", "already absent".yellow(), name);
        }
        for (name, error) in &report.failed {
            println!("  {} {}: {}", "unremoved".red().bold(), name, error);
        }
    }
}

fn kind_label(kind: ResourceKind) -> String {
    format!("{:<24}", kind.to_string())
}
