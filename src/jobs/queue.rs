use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::retry::{with_retry, RetryPolicy};

use super::history::{JobHistory, JobRecord};
use super::{JobPayload, JobType};

/// Executes one attempt of a job and reports what it did.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_type: JobType, payload: &JobPayload) -> Result<serde_json::Value>;
}

struct QueuedJob {
    id: String,
    payload: JobPayload,
}

/// One queue per job type, each drained by a worker with its own concurrency bound.
pub struct JobQueue {
    senders: Mutex<HashMap<JobType, mpsc::UnboundedSender<QueuedJob>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    history: Arc<JobHistory>,
}

impl JobQueue {
    /// Spawns a worker for every job type. Attempt counts come from the job
    /// type; delays come from `backoff`.
    pub fn start(
        handler: Arc<dyn JobHandler>,
        history: Arc<JobHistory>,
        backoff: RetryPolicy,
    ) -> Arc<Self> {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for job_type in JobType::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(job_type, tx);
            let policy = RetryPolicy {
                max_attempts: job_type.max_attempts(),
                ..backoff.clone()
            };
            workers.push(tokio::spawn(run_worker(
                job_type,
                rx,
                handler.clone(),
                history.clone(),
                policy,
            )));
        }

        Arc::new(Self {
            senders: Mutex::new(senders),
            workers: tokio::sync::Mutex::new(workers),
            history,
        })
    }

    pub fn history(&self) -> &JobHistory {
        &self.history
    }

    /// Queues a job and returns its id.
    pub fn enqueue(&self, job_type: JobType, payload: JobPayload) -> Result<String> {
        self.history.prune(Utc::now());

        let record = JobRecord::new(job_type, payload.clone());
        let id = record.id.clone();
        let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let sender = senders.get(&job_type).ok_or(AppError::QueueClosed)?;

        self.history.insert(record);
        if sender.send(QueuedJob { id: id.clone(), payload }).is_err() {
            self.history.mark_failed(&id, AppError::QueueClosed.to_string());
            return Err(AppError::QueueClosed);
        }
        debug!(job_id = %id, %job_type, "Job enqueued");
        Ok(id)
    }

    /// Stops accepting jobs and waits for queued and in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Job worker panicked");
            }
        }
        info!("Job queue drained");
    }
}

async fn run_worker(
    job_type: JobType,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    handler: Arc<dyn JobHandler>,
    history: Arc<JobHistory>,
    policy: RetryPolicy,
) {
    let permits = Arc::new(Semaphore::new(job_type.concurrency()));
    let mut running = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let handler = handler.clone();
        let history = history.clone();
        let policy = policy.clone();
        running.spawn(async move {
            run_job(job_type, job, handler.as_ref(), &history, &policy).await;
            drop(permit);
        });

        // Reap finished tasks so the set does not grow without bound.
        while running.try_join_next().is_some() {}
    }

    while running.join_next().await.is_some() {}
    debug!(%job_type, "Worker stopped");
}

async fn run_job(
    job_type: JobType,
    job: QueuedJob,
    handler: &dyn JobHandler,
    history: &JobHistory,
    policy: &RetryPolicy,
) {
    history.mark_running(&job.id);
    info!(job_id = %job.id, %job_type, "Job started");

    let result = with_retry(policy, || {
        history.record_attempt(&job.id);
        handler.handle(job_type, &job.payload)
    })
    .await;

    match result {
        Ok(report) => {
            info!(job_id = %job.id, %job_type, %report, "Job completed");
            history.mark_completed(&job.id, report);
        }
        Err(e) => {
            let attempts = history.get(&job.id).map(|r| r.attempts).unwrap_or_default();
            if e.is_transient() {
                error!(job_id = %job.id, %job_type, attempts, error = %e, "Job failed permanently");
            } else {
                warn!(job_id = %job.id, %job_type, error = %e, "Job rejected");
            }
            history.mark_failed(&job.id, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks peak concurrency and fails the first `transient_failures` calls.
    #[derive(Default)]
    struct RecordingHandler {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        transient_failures: usize,
        reject: bool,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, _job_type: JobType, _payload: &JobPayload) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(AppError::Validation("bad payload".into()));
            }
            if call < self.transient_failures {
                return Err(AppError::provider("test", "flaky"));
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "call": call }))
        }
    }

    fn history() -> Arc<JobHistory> {
        Arc::new(JobHistory::new(chrono::Duration::hours(24), chrono::Duration::days(7)))
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_per_type() {
        let handler = Arc::new(RecordingHandler::default());
        let queue = JobQueue::start(handler.clone(), history(), RetryPolicy::immediate(1));

        for _ in 0..6 {
            queue.enqueue(JobType::SummarizeArticles, JobPayload::default()).unwrap();
        }
        queue.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert!(queue
            .history()
            .list()
            .iter()
            .all(|r| r.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_episode_jobs_run_one_at_a_time() {
        let handler = Arc::new(RecordingHandler::default());
        let queue = JobQueue::start(handler.clone(), history(), RetryPolicy::immediate(1));
        for _ in 0..3 {
            queue.enqueue(JobType::GenerateEpisodes, JobPayload::default()).unwrap();
        }
        queue.shutdown().await;
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_within_budget() {
        let handler = Arc::new(RecordingHandler {
            transient_failures: 4,
            ..Default::default()
        });
        let queue = JobQueue::start(handler.clone(), history(), RetryPolicy::immediate(1));

        let id = queue.enqueue(JobType::FetchArticles, JobPayload::default()).unwrap();
        queue.shutdown().await;

        let record = queue.history().get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 5);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_marked_failed() {
        let handler = Arc::new(RecordingHandler {
            transient_failures: 10,
            ..Default::default()
        });
        let queue = JobQueue::start(handler, history(), RetryPolicy::immediate(1));

        let id = queue.enqueue(JobType::GenerateEmbeddings, JobPayload::default()).unwrap();
        queue.shutdown().await;

        let record = queue.history().get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert!(record.error.unwrap().contains("Failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let handler = Arc::new(RecordingHandler {
            reject: true,
            ..Default::default()
        });
        let queue = JobQueue::start(handler.clone(), history(), RetryPolicy::immediate(1));

        let id = queue.enqueue(JobType::FetchArticles, JobPayload::default()).unwrap();
        queue.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.history().get(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = JobQueue::start(
            Arc::new(RecordingHandler::default()),
            history(),
            RetryPolicy::immediate(1),
        );
        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(JobType::FetchArticles, JobPayload::default()),
            Err(AppError::QueueClosed)
        ));
    }
}
