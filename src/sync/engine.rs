use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::diff::{SetDiff, TagDiff};
use super::manifest::ManifestProcessor;
use crate::config::{SyncConfig, host_from_url};
use crate::error::{Error, Result};
use crate::registry::{RegistryClient, RegistryManager};
use crate::store::{CacheStore, CatalogStore, JobQueue, Store};
use crate::types::{JobType, NewJob, SyncJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Jobs processed by a call to [`SyncEngine::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
}

/// Executes sync jobs against the registries and the store.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    registries: Arc<RegistryManager>,
    max_attempts: i64,
    job_retention: Duration,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, registries: Arc<RegistryManager>, config: &SyncConfig) -> Self {
        Self {
            store,
            registries,
            max_attempts: config.max_attempts,
            job_retention: config.job_retention,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Claims one job, runs it and records the outcome. Returns `None` when
    /// no job is eligible.
    pub fn run_next(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.store.dequeue_job()? else {
            return Ok(None);
        };

        match self.process_job(&job) {
            Ok(()) => {
                self.store.complete_job(job.id)?;
                Ok(Some(JobOutcome::Completed))
            }
            Err(e) => {
                warn!(
                    "Job {} ({} {}) failed on attempt {}/{}: {e}",
                    job.id,
                    job.job_type,
                    describe_scope(&job),
                    job.attempts,
                    job.max_attempts
                );
                self.store.fail_job(job.id, &e.to_string())?;
                Ok(Some(JobOutcome::Failed))
            }
        }
    }

    /// Runs jobs on the calling thread until none is eligible, then
    /// post-processes.
    pub fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(outcome) = self.run_next()? {
            match outcome {
                JobOutcome::Completed => report.completed += 1,
                JobOutcome::Failed => report.failed += 1,
            }
        }
        self.post_process()?;
        Ok(report)
    }

    /// Refreshes dirty cache rows and drops old completed jobs.
    pub fn post_process(&self) -> Result<()> {
        let refreshed = self.store.refresh_all_dirty()?;
        let purged = self.store.delete_completed_jobs(self.job_retention)?;
        if refreshed.repositories > 0 || refreshed.tags > 0 || purged > 0 {
            info!(
                "Refreshed {} repositories and {} tags, purged {purged} completed jobs",
                refreshed.repositories, refreshed.tags
            );
        }
        Ok(())
    }

    pub fn process_job(&self, job: &SyncJob) -> Result<()> {
        let client = self.registries.client(&job.registry_name)?;
        match job.job_type {
            JobType::Catalog => self.sync_catalog(client.as_ref()),
            JobType::Tags => self.sync_tags(client.as_ref(), job.require_repository()?),
            JobType::Manifest => {
                let repository = job.require_repository()?;
                let tag = job.require_tag()?;
                let saved = ManifestProcessor::new(client.as_ref()).process(
                    self.store.as_ref(),
                    repository,
                    tag,
                )?;
                debug!("{}/{repository}:{tag} -> {}", job.registry_name, saved.digest);
                Ok(())
            }
        }
    }

    fn enqueue(&self, job: NewJob) -> Result<bool> {
        self.store.enqueue_job(&job.with_max_attempts(self.max_attempts))
    }

    /// Records the outcome of the last registry call. A registry with no row
    /// yet is left alone.
    fn record_status(&self, registry: &str, status: i64) {
        match self.store.set_registry_status(registry, status) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => warn!("Failed to record status of {registry}: {e}"),
        }
    }

    fn sync_catalog(&self, client: &dyn RegistryClient) -> Result<()> {
        let registry = client.name();
        let remote = match client.list_repositories() {
            Ok(remote) => remote,
            Err(e) => {
                self.record_status(registry, i64::from(e.status_bucket()));
                return Err(e.into());
            }
        };
        self.record_status(registry, 200);
        let local = self.store.list_repository_names(registry)?;
        let diff = SetDiff::compute(&remote, &local);

        for name in &diff.removed {
            match self.store.delete_repository(registry, name) {
                Ok(_) => info!("Removed repository {registry}/{name}"),
                Err(e) => error!("Failed to delete repository {registry}/{name}: {e}"),
            }
        }

        let host = host_from_url(client.base_url());
        for name in &diff.new {
            if let Err(e) = self.store.ensure_repository(registry, &host, name) {
                error!("Failed to create repository {registry}/{name}: {e}");
                continue;
            }
            if let Err(e) = self.enqueue(NewJob::tags(registry, name)) {
                error!("Failed to queue tags scan for {registry}/{name}: {e}");
            }
        }

        info!(
            "Catalog {registry}: {} new, {} removed, {} unchanged",
            diff.new.len(),
            diff.removed.len(),
            diff.common.len()
        );
        Ok(())
    }

    fn sync_tags(&self, client: &dyn RegistryClient, repository: &str) -> Result<()> {
        let registry = client.name();
        let remote = client.list_tags(repository)?;
        let local = self.store.list_tag_digests(registry, repository)?;

        let diff = TagDiff::compute(&remote, &local, |tag| {
            match client.head_manifest(repository, tag) {
                Ok(head) => Some(head.digest),
                Err(e) => {
                    debug!("HEAD {registry}/{repository}:{tag} failed, refetching: {e}");
                    None
                }
            }
        });

        for tag in &diff.removed {
            if let Err(e) = self.store.delete_tag(registry, repository, tag) {
                error!("Failed to delete tag {registry}/{repository}:{tag}: {e}");
            }
        }

        for tag in diff.to_fetch() {
            if let Err(e) = self.enqueue(NewJob::manifest(registry, repository, tag)) {
                error!("Failed to queue manifest fetch for {registry}/{repository}:{tag}: {e}");
            }
        }

        info!(
            "Tags {registry}/{repository}: {} new, {} changed, {} removed, {} unchanged",
            diff.new.len(),
            diff.changed.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        Ok(())
    }
}

fn describe_scope(job: &SyncJob) -> String {
    match (&job.repository, &job.tag_ref) {
        (Some(repo), Some(tag)) => format!("{}/{repo}:{tag}", job.registry_name),
        (Some(repo), None) => format!("{}/{repo}", job.registry_name),
        _ => job.registry_name.clone(),
    }
}
