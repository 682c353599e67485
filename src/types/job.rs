use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a sync job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Catalog,
    Tags,
    Manifest,
}

impl JobType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Tags => "tags",
            Self::Manifest => "manifest",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "catalog" => Some(Self::Catalog),
            "tags" => Some(Self::Tags),
            "manifest" => Some(Self::Manifest),
            _ => None,
        }
    }

    /// Default claim priority. Catalog scans run before tag scans, which run
    /// before manifest fetches.
    pub const fn default_priority(self) -> i64 {
        match self {
            Self::Catalog => 2,
            Self::Tags => 1,
            Self::Manifest => 0,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of sync work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: i64,
    pub job_type: JobType,
    pub registry_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ref: Option<String>,
    pub status: JobStatus,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub backoff_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Repository scope, required by `tags` and `manifest` jobs.
    pub fn require_repository(&self) -> crate::Result<&str> {
        self.repository.as_deref().ok_or_else(|| {
            crate::Error::InvalidJob(format!("{} job {} has no repository", self.job_type, self.id))
        })
    }

    /// Tag scope, required by `manifest` jobs.
    pub fn require_tag(&self) -> crate::Result<&str> {
        self.tag_ref.as_deref().ok_or_else(|| {
            crate::Error::InvalidJob(format!("{} job {} has no tag reference", self.job_type, self.id))
        })
    }
}

/// Parameters for enqueuing a job. The scope columns together with the
/// job type and registry form the queue's uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub job_type: JobType,
    pub registry_name: String,
    pub repository: Option<String>,
    pub tag_ref: Option<String>,
    pub priority: i64,
    pub max_attempts: i64,
}

impl NewJob {
    pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

    pub fn catalog(registry_name: impl Into<String>) -> Self {
        Self::new(JobType::Catalog, registry_name, None, None)
    }

    pub fn tags(registry_name: impl Into<String>, repository: impl Into<String>) -> Self {
        Self::new(JobType::Tags, registry_name, Some(repository.into()), None)
    }

    pub fn manifest(
        registry_name: impl Into<String>,
        repository: impl Into<String>,
        tag_ref: impl Into<String>,
    ) -> Self {
        Self::new(
            JobType::Manifest,
            registry_name,
            Some(repository.into()),
            Some(tag_ref.into()),
        )
    }

    fn new(
        job_type: JobType,
        registry_name: impl Into<String>,
        repository: Option<String>,
        tag_ref: Option<String>,
    ) -> Self {
        Self {
            job_type,
            registry_name: registry_name.into(),
            repository,
            tag_ref,
            priority: job_type.default_priority(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
