// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::{
    runtime::Handle,
    sync::{Mutex, mpsc},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    context::JobContext,
    err::JobError,
    job::Job,
    metrics::{
        JOB_EXECUTION_DURATION_SECONDS, JOB_EXECUTION_ERRORS, JOB_EXECUTIONS, JOB_WORKERS_ACTIVE,
    },
};

/// Receiving half of the job queue, shared by every worker of a dispatcher.
/// Whoever holds the lock is the next worker to dequeue.
pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// A loop that pulls jobs off the shared queue and runs them one at a time.
pub(crate) struct Worker {
    id:          usize,
    queue:       JobQueue,
    job_timeout: Duration,
    stop:        CancellationToken,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: JobQueue, job_timeout: Duration) -> Self {
        Worker {
            id,
            queue,
            job_timeout,
            stop: CancellationToken::new(),
        }
    }

    pub(crate) const fn id(&self) -> usize { self.id }

    /// Spawn the worker loop, registered with `tracker` so the dispatcher can
    /// wait for it to exit.
    pub(crate) fn start(&self, tracker: &TaskTracker, runtime: &Handle) {
        let id = self.id;
        let queue = Arc::clone(&self.queue);
        let stop = self.stop.clone();
        let job_timeout = self.job_timeout;
        tracker.spawn_on(run_loop(id, queue, stop, job_timeout), runtime);
    }

    /// Signal the loop to exit. A job already running is finished first; no
    /// new job is taken. Safe to call any number of times.
    pub(crate) fn stop(&self) { self.stop.cancel(); }
}

async fn run_loop(worker_id: usize, queue: JobQueue, stop: CancellationToken, job_timeout: Duration) {
    JOB_WORKERS_ACTIVE.inc();
    info!(worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            job = async { queue.lock().await.recv().await } => job,
        };

        let Some(job) = next else {
            warn!(worker_id, "Job queue closed");
            break;
        };
        execute(worker_id, job, job_timeout).await;
    }

    info!(worker_id, "Worker is shutting down");
    JOB_WORKERS_ACTIVE.dec();
}

async fn execute(worker_id: usize, job: Box<dyn Job>, job_timeout: Duration) {
    let job_id = job.id();
    let job_name = job.name();
    info!(%job_id, job_name, worker_id, "Processing job");

    let ctx = JobContext::new().with_timeout(job_timeout);
    let timer = JOB_EXECUTION_DURATION_SECONDS
        .with_label_values(&[job_name])
        .start_timer();
    let outcome = AssertUnwindSafe(job.execute(&ctx)).catch_unwind().await;
    timer.observe_duration();

    let overran = ctx.is_expired();
    ctx.cancel();

    let result = outcome.unwrap_or_else(|panic| Err(JobError::failed(panic_message(&*panic))));
    match result {
        Ok(()) => {
            if overran {
                warn!(%job_id, job_name, worker_id, timeout = ?job_timeout, "Job finished after its deadline");
            }
            info!(%job_id, job_name, worker_id, "Job completed successfully");
            JOB_EXECUTIONS.with_label_values(&[job_name]).inc();
        }
        Err(e) => {
            error!(%job_id, job_name, worker_id, error = %e, "Failed to process job");
            JOB_EXECUTION_ERRORS.with_label_values(&[job_name]).inc();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "job panicked".to_string(),
            |msg| format!("job panicked: {msg}"),
        )
}
