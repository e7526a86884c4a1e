//! CLI output formatting

use crate::{
    core::{Counters, ExecutionStatus, ProgressEvent, RunSummary},
    execution::{DiagnosticKind, ExecutionEvent},
    persistence::{ImageRecord, Stage},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar for one step's counters
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let progress = ProgressBar::new(total);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Validating => style("VALIDATING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Rejected => style("REJECTED").red().to_string(),
    }
}

pub fn format_counters(counters: &Counters) -> String {
    format!(
        "{}/{} ({} ok, {} failed)",
        counters.processed(),
        counters.total,
        style(counters.succeeded).green(),
        style(counters.failed).red()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted { run_id } => {
            format!("{} Starting run {}", ROCKET, style(run_id).bold())
        }
        ExecutionEvent::Progress {
            step,
            execution_path,
            progress,
        } => {
            let detail = match progress {
                ProgressEvent::Counters(counters) => format_counters(counters),
                ProgressEvent::Message(message) => message.clone(),
            };
            format!(
                "{} [{}] {} {}",
                SPINNER,
                step,
                style(execution_path).cyan(),
                detail
            )
        }
        ExecutionEvent::Diagnostic {
            step,
            kind,
            message,
        } => {
            let icon = match kind {
                DiagnosticKind::Validation => WARN,
                DiagnosticKind::Step | DiagnosticKind::Pipeline => CROSS,
            };
            match step {
                Some(step) => format!("{} [{}] {}", icon, step, style(message).red()),
                None => format!("{} {}", icon, style(message).red()),
            }
        }
        ExecutionEvent::PipelineCompleted { run_id } => {
            format!("{} Run {} completed", CHECK, style(run_id).bold())
        }
    }
}

/// Format a run summary for display
pub fn format_summary(summary: &RunSummary) -> String {
    let icon = match summary.status {
        ExecutionStatus::Completed if summary.diagnostics.is_empty() => CHECK,
        ExecutionStatus::Completed => WARN,
        _ => CROSS,
    };

    format!(
        "{} {} - {} - {} step(s) reported, {} diagnostic(s)",
        icon,
        style(&summary.run_id).dim(),
        format_status(summary.status),
        style(summary.steps_reporting).cyan(),
        style(summary.diagnostics.len()).cyan()
    )
}

/// Format one result row, optionally restricted to one evaluation
pub fn format_image_record(record: &ImageRecord, evaluation_id: Option<&str>) -> String {
    let mut line = format!("  {} {}", style(format!("#{}", record.id)).dim(), record.input_image_path);
    let mut produced = Stage::ALL
        .iter()
        .filter_map(|stage| record.stage_file(*stage).map(|file| (stage, file)))
        .peekable();
    if produced.peek().is_none() {
        line.push_str(" -> -");
    }
    for (stage, file) in produced {
        line.push_str(&format!(" -> {} {}", style(stage).dim(), file.path));
    }

    for (id, result) in &record.results {
        if evaluation_id.is_some_and(|wanted| wanted != id.as_str()) {
            continue;
        }
        let metric = |name: &str| result.get(name).and_then(|v| v.as_f64());
        if let (Some(mse), Some(psnr)) = (metric("MSE"), metric("PSNR")) {
            line.push_str(&format!(
                "\n      {}: MSE {:.3}, PSNR {:.2} dB",
                style(id).cyan(),
                mse,
                psnr
            ));
            if let Some(ssim) = metric("SSIM") {
                line.push_str(&format!(", SSIM {:.4}", ssim));
            }
        }
    }

    line
}

/// Format a list of row fields, one per line
pub fn format_fields(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| format!("  {} {}", INFO, field))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Streams events to the terminal, drawing a bar while a step reports
/// counters
#[derive(Default)]
pub struct RunDisplay {
    bar: Option<(usize, ProgressBar)>,
}

impl RunDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &ExecutionEvent) {
        if let ExecutionEvent::Progress {
            step,
            execution_path,
            progress: ProgressEvent::Counters(counters),
        } = event
        {
            let bar = self.bar_for(*step, execution_path);
            bar.set_length(counters.total);
            bar.set_position(counters.processed());
            if counters.failed > 0 {
                bar.set_message(style(format!("{} failed", counters.failed)).red().to_string());
            }
            return;
        }

        let line = format_execution_event(event);
        if matches!(event, ExecutionEvent::Progress { .. }) {
            if let Some((_, bar)) = &self.bar {
                bar.println(line);
                return;
            }
        }

        self.finish_bar();
        println!("{}", line);
    }

    fn bar_for(&mut self, step: usize, execution_path: &str) -> &ProgressBar {
        if self.bar.as_ref().is_some_and(|(s, _)| *s != step) {
            self.finish_bar();
        }
        let (_, bar) = self.bar.get_or_insert_with(|| {
            let bar = create_progress_bar(0);
            bar.set_prefix(execution_path.to_string());
            (step, bar)
        });
        bar
    }

    /// Close the current bar, if any
    pub fn finish_bar(&mut self) {
        if let Some((_, bar)) = self.bar.take() {
            bar.finish();
        }
    }
}
