//! `gradectl recalc` (one synchronous run) and `gradectl replay` (queue a
//! file of task arguments through the dispatcher).

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

use grade_recompute_core::{CourseKey, LearnerId, RecalcError, RecalcOutcome, ScoreEvent};

use crate::config::Config;
use crate::score_cmd::parse_usage;
use crate::service::GradeService;

pub async fn run_recalc(config: &Config, user: u64, course: &str, usage: &str) -> Result<()> {
    let course: CourseKey = course.parse()?;
    let usage = parse_usage(&course, usage)?;
    let event = ScoreEvent::new(LearnerId(user), course, &usage);

    let service = GradeService::connect(config).await?;
    let result = service.recalculator.recalculate(&event).await;
    service.close().await;

    match result {
        Ok(RecalcOutcome::Disabled) => {
            println!("Persistent grades are disabled for {}", event.course);
        }
        Ok(RecalcOutcome::NoAffectedSubsections) => {
            println!("No subsections affected by {}", event.usage);
        }
        Ok(RecalcOutcome::Updated(grades)) => {
            println!("Updated {} subsection grade(s):", grades.len());
            for grade in &grades {
                println!(
                    "  {}  {}/{}",
                    grade.subsection, grade.all_total.earned, grade.all_total.possible
                );
            }
        }
        Err(RecalcError::PersistFailed { persisted, failed }) => {
            for subsection in &persisted {
                println!("  saved   {}", subsection);
            }
            for (subsection, reason) in &failed {
                eprintln!("  failed  {}: {}", subsection, reason);
            }
            bail!("{} subsection grade(s) could not be saved", failed.len());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Parse a JSON Lines file of task arguments. Blank lines are skipped.
pub fn read_task_file(content: &str) -> Result<Vec<Map<String, Value>>> {
    let mut tasks = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid JSON", i + 1))?;
        match value {
            Value::Object(args) => tasks.push(args),
            _ => bail!("line {}: expected a JSON object of task arguments", i + 1),
        }
    }
    Ok(tasks)
}

pub async fn run_replay(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;
    let tasks = read_task_file(&content)?;

    let service = GradeService::connect(config).await?;
    let dispatcher = service.dispatcher(config);
    for args in tasks {
        dispatcher.enqueue(args).await?;
    }
    let summary = dispatcher.shutdown().await?;
    service.close().await;

    println!("Replayed {} task(s)", summary.submitted);
    println!("  updated: {}", summary.updated);
    println!("  skipped: {}", summary.skipped);
    println!("  failed:  {}", summary.failed);
    println!("  retries: {}", summary.retries);
    Ok(())
}
