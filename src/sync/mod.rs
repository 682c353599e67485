//! Differential sync: job execution, manifest processing and the worker pool.

mod diff;
mod engine;
mod manifest;
mod scheduler;
#[cfg(test)]
mod testing;
mod worker;

pub use diff::{SetDiff, TagDiff};
pub use engine::{DrainReport, JobOutcome, SyncEngine};
pub use manifest::ManifestProcessor;
pub use scheduler::{ScheduleReport, Scheduler};
pub use worker::{IdleBackoff, RunningPool, WorkerPool};
