use anyhow::{Result, anyhow, bail};
use console::style;
use std::time::Duration;

use super::{RangeFlags, RunCommandArgs};
use crate::core::AppContext;
use crate::core::operations::trigger_statement;
use crate::core::store::{JobRecord, JobStatus, LogRecord};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn styled_status(status: JobStatus) -> String {
    match status {
        JobStatus::InProgress => style(status.as_str()).yellow().bold().to_string(),
        JobStatus::Success => style(status.as_str()).green().bold().to_string(),
        JobStatus::Failed => style(status.as_str()).red().bold().to_string(),
    }
}

fn timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_job_row(job: &JobRecord) {
    println!(
        "  {:>6}  {:<24}  {:<20}  {}  {}",
        style(job.id).dim(),
        job.operation_type,
        styled_status(job.status),
        timestamp(&job.created_at),
        job.details
    );
}

fn print_log_row(log: &LogRecord) {
    let job = log
        .job_id
        .map(|id| format!("job {}", id))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {}  {:<24}  {:<8}  {}",
        timestamp(&log.created_at),
        log.operation_type,
        style(job).dim(),
        log.error_message
    );
}

pub async fn list_jobs(ctx: &AppContext, flags: &RangeFlags) -> Result<()> {
    let range = flags.to_range()?;
    let jobs = ctx.store.list_jobs(range.as_ref()).await?;
    if jobs.is_empty() {
        print_info("No jobs found.");
        return Ok(());
    }
    println!("{}", style(format!("Jobs ({})", jobs.len())).bold());
    for job in &jobs {
        print_job_row(job);
    }
    Ok(())
}

pub async fn list_logs(ctx: &AppContext, flags: &RangeFlags) -> Result<()> {
    let range = flags.to_range()?;
    let logs = ctx.store.list_logs(range.as_ref()).await?;
    if logs.is_empty() {
        print_info("No log entries found.");
        return Ok(());
    }
    println!("{}", style(format!("Logs ({})", logs.len())).bold());
    for log in &logs {
        print_log_row(log);
    }
    Ok(())
}

pub async fn show_job(ctx: &AppContext, raw_id: Option<&str>) -> Result<()> {
    let raw_id = raw_id.ok_or_else(|| anyhow!("Usage: cortexkit job <id>"))?;
    let id: i64 = raw_id
        .parse()
        .map_err(|_| anyhow!("Invalid job id '{}'", raw_id))?;
    let Some(job) = ctx.store.get_job(id).await? else {
        print_error(&format!("Job {} not found.", id));
        return Ok(());
    };

    let completed = job
        .completed_at
        .as_ref()
        .map(timestamp)
        .unwrap_or_else(|| "-".to_string());
    let mut section = GuideSection::new(&format!("Job {}", job.id))
        .status("Operation", &job.operation_type)
        .status("Status", &styled_status(job.status))
        .status("Created", &timestamp(&job.created_at))
        .status("Completed", &completed)
        .status("Details", &job.details);

    let logs = ctx.store.logs_for_job(job.id).await?;
    if !logs.is_empty() {
        section = section.blank();
        for log in &logs {
            section = section.bullet(&format!("{}  {}", timestamp(&log.created_at), log.error_message));
        }
    }
    section.print();
    Ok(())
}

pub async fn run_statement(ctx: &AppContext, args: &RunCommandArgs) -> Result<()> {
    if args.operation.trim().is_empty() || args.statement.trim().is_empty() {
        print_error("Both --operation and --statement are required.");
        GuideSection::new("cortexkit run")
            .text("--operation, -o <name>   Operation type recorded in the ledger")
            .text("--statement, -s <sql>    SQL statement to execute")
            .text("--details <text>         Free-form details stored with the job")
            .blank()
            .hint("cortexkit run -o refresh_sales -s \"CALL refresh_sales()\"", "")
            .print();
        return Ok(());
    }

    let executor = ctx.executor().await?;
    let handle = trigger_statement(
        &ctx.runner,
        executor,
        &args.operation,
        &args.details,
        &args.statement,
    )
    .await?;
    let job_id = handle.job_id;
    print_info(&format!("Job {} started ({}).", job_id, args.operation));

    // Poll the ledger rather than the handle so the command shows what others see.
    let job = loop {
        let job = ctx
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("Job {} disappeared from the ledger", job_id))?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    // The body's error is already in the ledger; the log row carries it.
    let _ = handle.wait().await;

    if job.status == JobStatus::Success {
        print_success(&format!("Job {} succeeded: {}", job_id, job.details));
        return Ok(());
    }
    let reason = ctx
        .store
        .logs_for_job(job_id)
        .await?
        .into_iter()
        .next()
        .map(|log| log.error_message)
        .unwrap_or_default();
    bail!("Job {} failed: {}", job_id, reason)
}
