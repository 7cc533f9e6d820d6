use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Selector, ValidationError};

const KEY_PREFIX: &str = "job.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    Data,
    Stats,
    Graph,
}

impl WorkType {
    pub const ALL: [WorkType; 3] = [WorkType::Data, WorkType::Stats, WorkType::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::Data => "data",
            WorkType::Stats => "stats",
            WorkType::Graph => "graph",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            WorkType::Data => "data_queue",
            WorkType::Stats => "stats_queue",
            WorkType::Graph => "graph_queue",
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(WorkType::Data),
            "stats" => Ok(WorkType::Stats),
            "graph" => Ok(WorkType::Graph),
            other => Err(ValidationError::single(format!(
                "Unknown work type '{other}', expected one of 'data', 'stats', 'graph'"
            ))),
        }
    }
}

/// Storage key of a job: `job.<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey(Uuid);

impl JobKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Accepts a bare UUID or one with the `job.` prefix.
    pub fn parse(s: &str) -> Option<Self> {
        let id = s.strip_prefix(KEY_PREFIX).unwrap_or(s);
        Uuid::parse_str(id).ok().map(Self)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for JobKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobKey {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{KEY_PREFIX}{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub work_type: WorkType,
    #[serde(flatten)]
    pub selector: Selector,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub results: Option<Value>,
}

impl Job {
    pub fn new(key: JobKey, work_type: WorkType, selector: Selector) -> Self {
        let now = Utc::now();
        Self {
            id: key.id(),
            status: JobStatus::Submitted,
            work_type,
            selector,
            created_at: now,
            updated_at: now,
            results: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey(self.id)
    }

    /// Applies a status update. Results are attached only once.
    pub fn apply_update(&mut self, status: JobStatus, results: Option<Value>) {
        self.status = status;
        self.updated_at = Utc::now();
        if self.results.is_none() {
            self.results = results;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_job_key_parse() {
        let key = JobKey::new();
        let bare = key.id().to_string();
        assert_eq!(JobKey::parse(&bare), Some(key));
        assert_eq!(JobKey::parse(&key.to_string()), Some(key));
        assert!(key.to_string().starts_with("job."));
        assert_eq!(JobKey::parse("job.not-a-uuid"), None);
    }

    #[test]
    fn test_work_type_from_str() {
        assert_eq!("stats".parse::<WorkType>().unwrap(), WorkType::Stats);
        assert!("stat".parse::<WorkType>().is_err());
        assert!("Graph".parse::<WorkType>().is_err());
    }

    #[test]
    fn test_results_are_attached_once() {
        let mut job = Job::new(JobKey::new(), WorkType::Data, Selector::default());
        assert_eq!(job.created_at, job.updated_at);

        job.apply_update(JobStatus::Processing, None);
        assert!(job.results.is_none());
        job.apply_update(JobStatus::Completed, Some(json!([1])));
        job.apply_update(JobStatus::Completed, Some(json!([2])));
        assert_eq!(job.results, Some(json!([1])));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_job_json_shape() {
        let job = Job::new(
            JobKey::new(),
            WorkType::Stats,
            Selector::range(Some(1750), Some(1760)).unwrap(),
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "Submitted");
        assert_eq!(value["work_type"], "stats");
        assert_eq!(value["start"], 1750);
        assert_eq!(value["limit"], Value::Null);
        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
