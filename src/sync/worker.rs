use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::SyncEngine;
use crate::config::SyncConfig;
use crate::error::Result;

/// Granularity of cancellation checks while idle.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Exponential idle delay between empty polls.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Sleeps up to `total`, waking early on cancellation. Returns `false` if
/// cancelled.
fn sleep_unless_cancelled(cancel: &CancellationToken, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// A fixed number of OS threads sharing one engine.
pub struct WorkerPool {
    engine: Arc<SyncEngine>,
    workers: usize,
    idle_min: Duration,
    idle_max: Duration,
}

impl WorkerPool {
    pub fn new(engine: Arc<SyncEngine>, config: &SyncConfig) -> Self {
        Self {
            engine,
            workers: config.workers.max(1),
            idle_min: config.idle_backoff_min,
            idle_max: config.idle_backoff_max,
        }
    }

    /// Spawns the workers. They stop after their current job once `cancel`
    /// fires.
    pub fn start(self, cancel: CancellationToken) -> Result<RunningPool> {
        info!("Starting {} sync workers", self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            let backoff = IdleBackoff::new(self.idle_min, self.idle_max);
            let handle = thread::Builder::new()
                .name(format!("regsync-worker-{id}"))
                .spawn(move || run_worker(id, &engine, &cancel, backoff))?;
            handles.push(handle);
        }
        Ok(RunningPool { handles, cancel })
    }
}

pub struct RunningPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RunningPool {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until every worker has exited.
    pub fn wait(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("Sync worker panicked");
            }
        }
    }
}

fn run_worker(id: usize, engine: &SyncEngine, cancel: &CancellationToken, mut backoff: IdleBackoff) {
    debug!("Worker {id} started");
    let mut worked_since_idle = false;

    while !cancel.is_cancelled() {
        match engine.run_next() {
            Ok(Some(_)) => {
                worked_since_idle = true;
                backoff.reset();
            }
            Ok(None) => {
                if worked_since_idle {
                    worked_since_idle = false;
                    if let Err(e) = engine.post_process() {
                        warn!("Worker {id} failed to post-process: {e}");
                    }
                }
                if !sleep_unless_cancelled(cancel, backoff.next_delay()) {
                    break;
                }
            }
            Err(e) => {
                error!("Worker {id} failed to claim a job: {e}");
                if !sleep_unless_cancelled(cancel, backoff.next_delay()) {
                    break;
                }
            }
        }
    }

    debug!("Worker {id} stopped");
}
