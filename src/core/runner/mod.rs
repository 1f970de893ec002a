use anyhow::{Result, anyhow};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::store::{JobStatus, LedgerError, Store};

/// What a job body sees while it runs.
pub struct JobContext {
    pub job_id: i64,
    pub operation_type: String,
    ledger: Store,
    cancel: CancellationToken,
}

impl JobContext {
    pub async fn update_details(&self, details: &str) -> Result<(), LedgerError> {
        self.ledger.update_job_details(self.job_id, details).await
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Returned as soon as the job row exists. Dropping it leaves the job running.
pub struct JobHandle {
    pub job_id: i64,
    join: JoinHandle<Result<()>>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state and return the body's outcome.
    pub async fn wait(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| anyhow!("job {} worker aborted: {}", self.job_id, e))?
    }
}

/// Runs operation bodies on the tokio runtime, at most `max_concurrent` at a
/// time, and records every outcome in the ledger.
#[derive(Clone)]
pub struct TaskRunner {
    ledger: Store,
    permits: Arc<Semaphore>,
    root: CancellationToken,
    max_concurrent: usize,
}

impl TaskRunner {
    pub fn new(ledger: Store, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            ledger,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            root: CancellationToken::new(),
            max_concurrent,
        }
    }

    pub fn ledger(&self) -> &Store {
        &self.ledger
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Create the In-Progress row, then spawn `body`. Ledger failures are
    /// returned here; body failures only ever surface through the handle.
    pub async fn trigger<F, Fut>(
        &self,
        operation_type: &str,
        details: &str,
        body: F,
    ) -> Result<JobHandle, LedgerError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job_id = self
            .ledger
            .create_job(operation_type, JobStatus::InProgress, details)
            .await?;
        info!("Triggered {} as job {}", operation_type, job_id);

        let ctx = JobContext {
            job_id,
            operation_type: operation_type.to_string(),
            ledger: self.ledger.clone(),
            cancel: self.root.child_token(),
        };
        let ledger = self.ledger.clone();
        let permits = self.permits.clone();
        let operation_type = operation_type.to_string();

        let join = tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(permit) => {
                    // Inner task so a panicking body is caught as a JoinError.
                    let joined = tokio::spawn(body(ctx)).await;
                    drop(permit);
                    match joined {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => {
                            Err(anyhow!("job panicked: {}", panic_message(e.into_panic())))
                        }
                        Err(e) => Err(anyhow!("job task cancelled: {}", e)),
                    }
                }
                Err(_) => Err(anyhow!("task runner is shut down")),
            };
            finalize(&ledger, job_id, &operation_type, outcome).await
        });

        Ok(JobHandle { job_id, join })
    }

    /// Cancel every running job and refuse queued ones.
    pub fn shutdown(&self) {
        info!("Shutting down task runner");
        self.root.cancel();
        self.permits.close();
    }
}

async fn finalize(ledger: &Store, job_id: i64, operation_type: &str, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => {
            ledger.update_job_status(job_id, JobStatus::Success).await?;
            info!("Job {} ({}) succeeded", job_id, operation_type);
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            if let Err(ledger_err) = ledger.fail_job(job_id, operation_type, &message).await {
                warn!("Could not record failure of job {}: {}", job_id, ledger_err);
            }
            error!("Job {} ({}) failed: {}", job_id, operation_type, message);
            Err(e)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runner(max: usize) -> TaskRunner {
        TaskRunner::new(Store::open_in_memory().unwrap(), max)
    }

    #[tokio::test]
    async fn successful_body_marks_success() {
        let runner = runner(2);
        let handle = runner
            .trigger("Translate", "en -> de", |_ctx| async { Ok(()) })
            .await
            .unwrap();
        let job_id = handle.job_id;
        handle.wait().await.unwrap();

        let job = runner.ledger().get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.completed_at.is_some());
        assert!(runner.ledger().list_logs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_is_in_progress_before_body_finishes() {
        let runner = runner(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = runner
            .trigger("Summarize", "", |_ctx| async move {
                let _ = rx.await;
                Ok(())
            })
            .await
            .unwrap();

        let job = runner.ledger().get_job(handle.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.completed_at.is_none());

        tx.send(()).unwrap();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn failing_body_marks_failed_and_logs() {
        let runner = runner(2);
        let handle = runner
            .trigger("Embed", "", |_ctx| async {
                Err(anyhow!("warehouse 'WH' is suspended"))
            })
            .await
            .unwrap();
        let job_id = handle.job_id;
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("suspended"));

        let job = runner.ledger().get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let logs = runner.ledger().logs_for_job(job_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].operation_type, "Embed");
        assert_eq!(logs[0].error_message, "warehouse 'WH' is suspended");
    }

    #[tokio::test]
    async fn panicking_body_marks_failed() {
        let runner = runner(2);
        let handle = runner
            .trigger("Search", "", |_ctx| async {
                if true {
                    panic!("index corrupted");
                }
                Ok(())
            })
            .await
            .unwrap();
        let job_id = handle.job_id;
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("index corrupted"));

        let job = runner.ledger().get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let logs = runner.ledger().logs_for_job(job_id).await.unwrap();
        assert!(logs[0].error_message.contains("index corrupted"));
    }

    #[tokio::test]
    async fn empty_operation_fails_trigger_without_spawning() {
        let runner = runner(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_body = ran.clone();
        let result = runner
            .trigger("", "", move |_ctx| async move {
                ran_in_body.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LedgerError::EmptyOperation)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn body_can_update_details() {
        let runner = runner(1);
        let handle = runner
            .trigger("FineTune", "", |ctx| async move {
                ctx.update_details("tracking id: ft-42").await?;
                Ok(())
            })
            .await
            .unwrap();
        let job_id = handle.job_id;
        handle.wait().await.unwrap();
        let job = runner.ledger().get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.details, "tracking id: ft-42");
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let runner = runner(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let current = current.clone();
            let peak = peak.clone();
            let handle = runner
                .trigger(&format!("Op{}", i), "", move |_ctx| async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
            handles.push(handle);
        }

        // Every job is tracked from the start, queued or not.
        let jobs = runner.ledger().list_jobs(None).await.unwrap();
        assert_eq!(jobs.len(), 8);

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_running_bodies() {
        let runner = runner(1);
        let handle = runner
            .trigger("Long", "", |ctx| async move {
                ctx.cancellation().cancelled().await;
                Err(anyhow!("cancelled by shutdown"))
            })
            .await
            .unwrap();
        let job_id = handle.job_id;

        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.shutdown();
        assert!(handle.wait().await.is_err());

        let job = runner.ledger().get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn queued_jobs_fail_after_shutdown() {
        let runner = runner(1);
        let blocker = runner
            .trigger("Blocker", "", |ctx| async move {
                ctx.cancellation().cancelled().await;
                Ok(())
            })
            .await
            .unwrap();
        let queued = runner
            .trigger("Queued", "", |_ctx| async { Ok(()) })
            .await
            .unwrap();
        let queued_id = queued.job_id;

        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.shutdown();
        blocker.wait().await.unwrap();
        let err = queued.wait().await.unwrap_err();
        assert!(err.to_string().contains("shut down"));

        let job = runner.ledger().get_job(queued_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
