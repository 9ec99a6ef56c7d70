use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::JobsConfig;
use crate::error::Result;
use crate::jobs::{JobPayload, JobQueue, JobType};

/// Prunes job history every hour at minute 30.
const PRUNE_CRON: &str = "0 30 * * * *";

/// Cron triggers that enqueue the recurring jobs.
pub struct BriefingScheduler {
    scheduler: JobScheduler,
}

impl BriefingScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// Registers one trigger per job type plus history pruning.
    pub async fn register(&self, queue: Arc<JobQueue>, config: &JobsConfig) -> Result<()> {
        let schedule = [
            (JobType::FetchArticles, config.fetch_cron.as_str()),
            (JobType::SummarizeArticles, config.summarize_cron.as_str()),
            (JobType::GenerateEmbeddings, config.embed_cron.as_str()),
            (JobType::GenerateEpisodes, config.episodes_cron.as_str()),
        ];

        for (job_type, cron_expr) in schedule {
            let queue = Arc::clone(&queue);
            let job = Job::new_async(cron_expr, move |_uuid, _lock| {
                let queue = Arc::clone(&queue);
                Box::pin(async move {
                    match queue.enqueue(job_type, JobPayload::default()) {
                        Ok(job_id) => info!(%job_type, %job_id, "Scheduled job enqueued"),
                        Err(e) => warn!(%job_type, error = %e, "Failed to enqueue scheduled job"),
                    }
                })
            })?;
            self.scheduler.add(job).await?;
            info!(%job_type, cron = cron_expr, "Registered schedule");
        }

        let prune = Job::new_async(PRUNE_CRON, move |_uuid, _lock| {
            let queue = Arc::clone(&queue);
            Box::pin(async move {
                let pruned = queue.history().prune(Utc::now());
                if pruned > 0 {
                    info!(pruned, "Pruned job history");
                }
            })
        })?;
        self.scheduler.add(prune).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("Scheduler started");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }
}
