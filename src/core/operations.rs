use std::sync::Arc;
use tracing::info;

use crate::core::runner::{JobHandle, TaskRunner};
use crate::core::store::LedgerError;
use crate::core::warehouse::StatementExecutor;

/// Job details once the statement has been accepted by the warehouse.
pub fn details_with_handle(details: &str, handle: &str) -> String {
    let details = details.trim();
    if details.is_empty() {
        format!("Statement handle: {}", handle)
    } else {
        format!("{} (statement handle: {})", details, handle)
    }
}

/// Run `statement` as a tracked operation. The job row exists when this
/// returns; the outcome lands in the ledger once the statement finishes.
pub async fn trigger_statement(
    runner: &TaskRunner,
    executor: Arc<dyn StatementExecutor>,
    operation_type: &str,
    details: &str,
    statement: &str,
) -> Result<JobHandle, LedgerError> {
    let statement = statement.to_string();
    let details_text = details.to_string();

    runner
        .trigger(operation_type, details, move |ctx| async move {
            let result = executor.execute(&statement, ctx.cancellation()).await?;
            info!(
                "Job {} statement {} finished with {} rows",
                ctx.job_id,
                result.handle,
                result.rows.len()
            );
            if !result.handle.is_empty() {
                ctx.update_details(&details_with_handle(&details_text, &result.handle))
                    .await?;
            }
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{JobStatus, Store};
    use crate::core::warehouse::StatementResult;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct FakeExecutor;

    #[async_trait]
    impl StatementExecutor for FakeExecutor {
        async fn execute(&self, statement: &str, _cancel: &CancellationToken) -> Result<StatementResult> {
            if statement.contains("fail") {
                bail!("SQL API error 422: object does not exist");
            }
            Ok(StatementResult {
                handle: "01b2-handle".to_string(),
                columns: vec![],
                rows: vec![],
            })
        }
    }

    #[test]
    fn details_with_handle_formats() {
        assert_eq!(details_with_handle("", "h1"), "Statement handle: h1");
        assert_eq!(
            details_with_handle("nightly refresh", "h1"),
            "nightly refresh (statement handle: h1)"
        );
    }

    #[tokio::test]
    async fn successful_statement_records_handle() {
        let store = Store::open_in_memory().unwrap();
        let runner = TaskRunner::new(store.clone(), 2);
        let handle = trigger_statement(
            &runner,
            Arc::new(FakeExecutor),
            "refresh_table",
            "nightly refresh",
            "INSERT INTO t SELECT 1",
        )
        .await
        .unwrap();
        let id = handle.job_id;
        handle.wait().await.unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.details, "nightly refresh (statement handle: 01b2-handle)");
    }

    #[tokio::test]
    async fn failed_statement_marks_job_failed_and_logs() {
        let store = Store::open_in_memory().unwrap();
        let runner = TaskRunner::new(store.clone(), 2);
        let handle = trigger_statement(&runner, Arc::new(FakeExecutor), "refresh_table", "", "SELECT fail")
            .await
            .unwrap();
        let id = handle.job_id;
        assert!(handle.wait().await.is_err());

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let logs = store.logs_for_job(id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error_message.contains("object does not exist"));
    }
}
