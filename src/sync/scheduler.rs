use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::registry::{HealthStatus, RegistryManager};
use crate::store::{CatalogStore, JobQueue, Store};
use crate::types::NewJob;

/// Summary of one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub registries_removed: usize,
    pub registries_recreated: usize,
    pub jobs_queued: usize,
}

/// Seeds the queue with the periodic catalog and tag scans.
pub struct Scheduler {
    store: Arc<dyn Store>,
    registries: Arc<RegistryManager>,
    max_attempts: i64,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, registries: Arc<RegistryManager>, max_attempts: i64) -> Self {
        Self {
            store,
            registries,
            max_attempts,
        }
    }

    pub fn schedule(&self, configs: &[RegistryConfig]) -> Result<ScheduleReport> {
        let mut report = ScheduleReport::default();

        let configured: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        for stored in self.store.list_registries()? {
            if !configured.contains(stored.name.as_str()) && self.store.delete_registry(&stored.name)? {
                info!("Removed registry {} (no longer configured)", stored.name);
                report.registries_removed += 1;
            }
        }

        for config in configs {
            let host = config.host();
            let previous = self.store.get_registry(&config.name)?;
            self.store.ensure_registry(&config.name, &host)?;
            if previous.is_some_and(|p| p.host != host) {
                report.registries_recreated += 1;
            }

            let client = self.registries.client(&config.name)?;
            let health = client.health_check();
            if health != HealthStatus::Status(200) {
                warn!("Registry {} health check: {health:?}", config.name);
            }
            self.store.set_registry_status(&config.name, health.code())?;

            if self.enqueue(NewJob::catalog(&config.name))? {
                report.jobs_queued += 1;
            }
            for repo in self.store.list_repository_names(&config.name)? {
                if self.enqueue(NewJob::tags(&config.name, repo))? {
                    report.jobs_queued += 1;
                }
            }
        }

        info!(
            "Scheduled {} jobs across {} registries",
            report.jobs_queued,
            configs.len()
        );
        Ok(report)
    }

    fn enqueue(&self, job: NewJob) -> Result<bool> {
        self.store.enqueue_job(&job.with_max_attempts(self.max_attempts))
    }
}
