//! Terminal output for `qroute demo`.
//!
//! Uses `console` to color one line per job by stage and `indicatif` for the
//! spinner shown while the delayed-job scheduler runs.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use qroute::{AuditRecord, JobId, State};

/// Prints demo sections and job lines.
pub struct Reporter {
    // Enqueued and succeeded jobs.
    green: Style,
    // Failed and deleted jobs.
    red: Style,
    // Everything still waiting: scheduled, awaiting, processing.
    yellow: Style,
    // Section headers.
    cyan: Style,
    // Ids, reasons and notes.
    dim: Style,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan().bold(),
            dim: Style::new().dim(),
        }
    }

    pub fn section(&self, title: &str) {
        println!();
        println!("{}", self.cyan.apply_to(format!("── {title} ──")));
    }

    /// One line per job: its id and current state, colored by stage.
    pub fn job(&self, label: &str, job_id: &JobId, state: &State) {
        let style = match state {
            State::Succeeded { .. } | State::Enqueued { .. } => &self.green,
            State::Failed { .. } | State::Deleted { .. } => &self.red,
            _ => &self.yellow,
        };
        let reason = state
            .reason()
            .map(|r| format!(" {}", self.dim.apply_to(format!("({r})"))))
            .unwrap_or_default();
        println!(
            "  {label:<12} {} {}{reason}",
            self.dim.apply_to(job_id),
            style.apply_to(state)
        );
    }

    pub fn note(&self, message: &str) {
        println!("  {}", self.dim.apply_to(message));
    }

    /// Spinner shown while waiting on the clock.
    pub fn wait(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn print_audit(&self, record: &AuditRecord) {
        println!(
            "{}",
            serde_json::to_string_pretty(record).unwrap_or_default()
        );
    }
}
