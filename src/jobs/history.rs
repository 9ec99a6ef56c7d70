use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{JobPayload, JobType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub report: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_type: JobType, payload: JobPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            error: None,
            report: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Recent job records, kept for inspection until their retention lapses.
pub struct JobHistory {
    records: Mutex<HashMap<String, JobRecord>>,
    completed_retention: Duration,
    failed_retention: Duration,
}

impl JobHistory {
    pub fn new(completed_retention: Duration, failed_retention: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            completed_retention,
            failed_retention,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        // Records stay consistent even if a holder panicked mid-update.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, record: JobRecord) {
        self.records().insert(record.id.clone(), record);
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.records().get_mut(id) {
            apply(record);
        }
    }

    pub fn mark_running(&self, id: &str) {
        self.update(id, |r| {
            r.status = JobStatus::Running;
            r.started_at = Some(Utc::now());
        });
    }

    pub fn record_attempt(&self, id: &str) {
        self.update(id, |r| r.attempts += 1);
    }

    pub fn mark_completed(&self, id: &str, report: serde_json::Value) {
        self.update(id, |r| {
            r.status = JobStatus::Completed;
            r.report = Some(report);
            r.finished_at = Some(Utc::now());
        });
    }

    pub fn mark_failed(&self, id: &str, error: String) {
        self.update(id, |r| {
            r.status = JobStatus::Failed;
            r.error = Some(error);
            r.finished_at = Some(Utc::now());
        });
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.records().get(id).cloned()
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.records().values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Drops finished records older than their retention; returns how many.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, r| {
            let retention = match r.status {
                JobStatus::Completed => self.completed_retention,
                JobStatus::Failed => self.failed_retention,
                JobStatus::Queued | JobStatus::Running => return true,
            };
            r.finished_at.map_or(true, |finished| now - finished < retention)
        });
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> JobHistory {
        JobHistory::new(Duration::hours(24), Duration::days(7))
    }

    #[test]
    fn test_status_display_and_terminal() {
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_lifecycle_updates() {
        let history = history();
        let record = JobRecord::new(JobType::FetchArticles, JobPayload::default());
        let id = record.id.clone();
        history.insert(record);

        history.mark_running(&id);
        history.record_attempt(&id);
        history.record_attempt(&id);
        history.mark_failed(&id, "boom".into());

        let record = history.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.started_at.is_some() && record.finished_at.is_some());
    }

    #[test]
    fn test_prune_respects_per_status_retention() {
        let history = history();
        let now = Utc::now();
        let mut ids = Vec::new();
        for (status, age) in [
            (JobStatus::Completed, Duration::hours(25)),
            (JobStatus::Completed, Duration::hours(1)),
            (JobStatus::Failed, Duration::days(3)),
            (JobStatus::Failed, Duration::days(8)),
            (JobStatus::Running, Duration::days(30)),
        ] {
            let mut record = JobRecord::new(JobType::SummarizeArticles, JobPayload::default());
            record.status = status;
            record.finished_at = status.is_terminal().then(|| now - age);
            ids.push(record.id.clone());
            history.insert(record);
        }

        assert_eq!(history.prune(now), 2);
        assert!(history.get(&ids[0]).is_none());
        assert!(history.get(&ids[1]).is_some());
        assert!(history.get(&ids[2]).is_some());
        assert!(history.get(&ids[3]).is_none());
        assert!(history.get(&ids[4]).is_some());
    }
}
