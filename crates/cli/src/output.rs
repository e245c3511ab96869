use crate::error::CliError;
use engine_core::{export::MergeReport, metrics::format_elapsed, progress::ProgressStatus};
use engine_config::plan::HarvestPlan;
use engine_runtime::summary::RunSummary;
use model::pagination::cursor::Cursor;

fn cursors(list: &[Cursor]) -> String {
    if list.is_empty() {
        return "none".to_string();
    }
    list.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_summary(summary: &RunSummary) {
    let counters = &summary.state.counters;
    println!("Harvest '{}' finished:", summary.run);
    println!("-----------------------------");
    println!("{:<16} {}", "Phase", summary.phase);
    if let Some(reason) = &summary.reason {
        println!("{:<16} {}", "Reason", reason);
    }
    if let Some(error) = &summary.error {
        println!("{:<16} {}", "Error", error);
    }
    println!("{:<16} {}", "Pages fetched", counters.pages_fetched);
    println!("{:<16} {}", "Pages failed", counters.pages_failed);
    println!("{:<16} {}", "Records", counters.records_flushed);
    println!("{:<16} {}", "Batches", counters.batches_flushed);
    println!("{:<16} {}", "Retries", counters.retry_count);
    println!("{:<16} {}", "Mapping errors", counters.mapping_errors);
    println!("{:<16} {}", "Gaps", cursors(&summary.gaps));
    let position = summary
        .checkpoint
        .as_ref()
        .map(|cp| cp.position.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!("{:<16} {}", "Checkpoint", position);
    println!("{:<16} {}", "Elapsed", format_elapsed(summary.state.elapsed));
}

pub fn print_status(run: &str, status: &ProgressStatus) {
    println!("Progress for run '{run}':");
    println!("-----------------------------");
    println!("{:<16} {}", "Stage", status.stage);
    let last = status
        .last_cursor
        .map(|c| c.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<16} {}", "Last cursor", last);
    println!("{:<16} {}", "Records", status.records_flushed);
    println!("{:<16} {}", "Batches", status.batches);
    println!("{:<16} {}", "Gaps", cursors(&status.gaps));
    println!("{:<16} {}", "Pending gaps", cursors(&status.pending_gaps));
    let started = status
        .started_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<16} {}", "Started", started);
    if let Some(outcome) = &status.outcome {
        println!("{:<16} {}", "Outcome", outcome);
    }
}

pub fn print_merge(report: &MergeReport) {
    println!("{:<16} {}", "Batches", report.batches);
    println!("{:<16} {}", "Records in", report.records_in);
    println!("{:<16} {}", "Records out", report.records_out);
    println!("{:<16} {}", "Duplicates", report.duplicates);
    println!("{:<16} {}", "Missing key", report.missing_key);
    println!("{:<16} {}", "Columns", report.columns);
}

pub fn print_check(plan: &HarvestPlan) {
    let engine = &plan.engine;
    println!("Plan '{}' is valid:", plan.run.name);
    println!("-----------------------------");
    println!("{:<16} {}", "Source", plan.source.kind());
    println!("{:<16} {}", "Normalizer", plan.normalize.kind());
    println!("{:<16} {}", "Concurrency", engine.concurrency);
    println!("{:<16} {}", "Max attempts", engine.max_attempts);
    println!("{:<16} {:?}", "Retry delay", engine.retry_delay);
    println!("{:<16} {:?}", "Timeout", engine.request_timeout);
    println!("{:<16} {}", "Flush at", engine.flush_threshold);
    let end = engine
        .end
        .map(|e| e.to_string())
        .unwrap_or_else(|| "until exhausted".to_string());
    println!("{:<16} {}..{}", "Cursors", engine.start, end);
    println!("{:<16} {}", "Batches to", plan.run.batch_dir().display());
    println!("{:<16} {}", "Fingerprint", plan.fingerprint());
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
