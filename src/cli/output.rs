//! CLI output formatting

use crate::core::{Concurrency, ExecutionStatus, HandleValue, Pipeline, StepStatus};
use crate::execution::{ExecutionEvent, RunReport};
use crate::persistence::CheckpointRecord;
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
pub static SAVED: Emoji<'_, '_> = Emoji("💾 ", "= ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Feed an engine event into the progress bar
///
/// Every event that settles a step advances the bar by one.
pub fn track_event(progress: &ProgressBar, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted { .. } => {}
        ExecutionEvent::StepStarted { step } => progress.set_message(step.clone()),
        ExecutionEvent::StepCheckpointed { .. }
        | ExecutionEvent::StepCompleted { .. }
        | ExecutionEvent::StepFailed { .. }
        | ExecutionEvent::StepNotAttempted { .. } => progress.inc(1),
        ExecutionEvent::PipelineCompleted { .. } => progress.finish_and_clear(),
    }
    if !matches!(event, ExecutionEvent::PipelineCompleted { .. }) {
        progress.println(format_execution_event(event));
    }
}

/// Format a step status for display
pub fn format_step_status(status: &StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running { .. } => style("RUNNING").yellow().to_string(),
        StepStatus::Completed { .. } => style("COMPLETED").green().to_string(),
        StepStatus::Checkpointed { .. } => style("CHECKPOINTED").cyan().to_string(),
        StepStatus::Failed { .. } => style("FAILED").red().to_string(),
        StepStatus::NotAttempted { .. } => style("NOT ATTEMPTED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

pub fn format_handle(name: &str, value: &HandleValue) -> String {
    format!("{} = {}", style(name).cyan(), value)
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Deploying {} ({} steps, run {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepCheckpointed { step, handles } => {
            if handles.is_empty() {
                format!("{} {} (checkpoint)", SAVED, style(step).dim())
            } else {
                format!(
                    "{} {} (checkpoint: {})",
                    SAVED,
                    style(step).dim(),
                    handles.join(", ")
                )
            }
        }
        ExecutionEvent::StepStarted { step } => format!("{} {}", SPINNER, style(step).cyan()),
        ExecutionEvent::StepCompleted { step, handles, tx_ids } => {
            let mut line = format!("{} {}", CHECK, style(step).green());
            if !handles.is_empty() {
                line.push_str(&format!(" → {}", handles.join(", ")));
            }
            if let Some(tx_id) = tx_ids.first() {
                line.push_str(&format!(" {}", style(format!("[{}]", tx_id)).dim()));
            }
            line
        }
        ExecutionEvent::StepFailed { step, error } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        ExecutionEvent::StepNotAttempted { step, blocked_by } => format!(
            "{} {} (blocked by {})",
            WARN,
            style(step).yellow(),
            style(blocked_by).dim()
        ),
        ExecutionEvent::PipelineCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                _ => format_status(*status),
            };
            format!(
                "{} Run ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Print the final report of a run
pub fn print_report(report: &RunReport) {
    println!();
    if report.is_success() {
        println!(
            "{} {} completed {}",
            CHECK,
            style(&report.pipeline_name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "{} {} {}",
            CROSS,
            style(&report.pipeline_name).bold(),
            style("failed").red()
        );
        if let Some(failure) = &report.first_failure {
            println!(
                "  First failure: {}: {}",
                style(&failure.step).red(),
                failure.message
            );
        }
        if !report.not_attempted.is_empty() {
            println!(
                "  Not attempted: {}",
                style(report.not_attempted.join(", ")).dim()
            );
        }
    }

    println!("\n  {}", style("Steps:").bold());
    for step in &report.steps {
        println!("    {:<32} {}", step.name, format_step_status(&step.status));
    }

    if !report.handles.is_empty() {
        println!("\n  {}", style("Handles:").bold());
        for (name, value) in &report.handles {
            println!("    {}", format_handle(name, value));
        }
    }
}

/// Print the pipeline's layered frontiers
pub fn print_plan(pipeline: &Pipeline) {
    println!(
        "{} Plan for {} ({} steps)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.len()
    );

    for (index, layer) in pipeline.layers().iter().enumerate() {
        println!("\n  {}", style(format!("Layer {}", index + 1)).bold());
        for name in layer {
            let Some(step) = pipeline.step(name) else {
                continue;
            };
            let class = if step.is_barrier() {
                style("barrier").dim()
            } else {
                match step.concurrency {
                    Concurrency::Exclusive => style("exclusive").yellow(),
                    Concurrency::ParallelSafe => style("parallel-safe").green(),
                }
            };
            let mut line = format!("    {:<32} {}", name, class);
            if !step.produces.is_empty() {
                line.push_str(&format!(" → {}", step.produces.join(", ")));
            }
            println!("{}", line);
        }
    }
}

/// Print the contents of a checkpoint store
pub fn print_checkpoints(location: &str, records: &[CheckpointRecord]) {
    if records.is_empty() {
        println!("{} No checkpoints in {}", INFO, style(location).dim());
        return;
    }

    println!(
        "{} {} checkpointed steps in {}",
        INFO,
        records.len(),
        style(location).dim()
    );
    for record in records {
        println!(
            "  {} {} {}",
            CHECK,
            style(&record.step).bold(),
            style(record.completed_at.to_rfc3339()).dim()
        );
        for (name, value) in &record.handles {
            println!("      {}", format_handle(name, value));
        }
    }
}
