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

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::{
    config::DispatcherConfig,
    context::JobContext,
    err::{ClosedSnafu, DispatchError, JobResult, NotRunningSnafu, QueueFullSnafu},
    job::Job,
    metrics::{JOB_DISPATCHED, JOB_REJECTED},
    worker::{JobQueue, Worker},
};

/// Owns a fixed pool of workers and the bounded queue they consume.
///
/// `Dispatcher` is a cheap handle: clones share the same pool, queue and
/// lifecycle. There is no global instance; hand the dispatcher to whatever
/// produces jobs.
///
/// Lifecycle: `stopped --start()--> running --stop()--> stopped`. Calling
/// `start` while running or `stop` while stopped does nothing. A stopped
/// dispatcher may be started again; jobs still queued at stop time are picked
/// up by the new workers.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use kiln_common_jobs::{Dispatcher, FnJob, JobContext};
///
/// # #[tokio::main]
/// # async fn main() {
/// let dispatcher = Dispatcher::new(4);
/// dispatcher.start();
///
/// dispatcher
///     .dispatch_job(FnJob::new("warm-cache", |_ctx| async { Ok(()) }))
///     .await;
///
/// let shutdown = JobContext::new().with_timeout(Duration::from_secs(10));
/// dispatcher.stop(&shutdown).await;
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    worker_count:   usize,
    queue_capacity: usize,
    job_timeout:    Duration,
    runtime:        Handle,
    sender:         mpsc::Sender<Box<dyn Job>>,
    queue:          JobQueue,
    state:          Mutex<State>,
}

#[derive(Default)]
struct State {
    running: bool,
    workers: Vec<Worker>,
    tracker: Option<TaskTracker>,
}

impl Dispatcher {
    /// Create a stopped dispatcher with `worker_count` workers and the
    /// default queue capacity and job timeout.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self::with_config(DispatcherConfig::builder().worker_count(worker_count).build())
    }

    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        let queue_capacity = config.queue_capacity();
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Dispatcher {
            inner: Arc::new(Inner {
                worker_count: config.worker_count(),
                queue_capacity,
                job_timeout: config.job_timeout(),
                runtime: config.runtime(),
                sender,
                queue: Arc::new(tokio::sync::Mutex::new(receiver)),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Spawn the worker pool. No-op if already running.
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }

        info!(
            max_workers = self.inner.worker_count,
            queue_capacity = self.inner.queue_capacity,
            "Starting job dispatcher"
        );

        let tracker = TaskTracker::new();
        state.workers = (0..self.inner.worker_count)
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&self.inner.queue), self.inner.job_timeout);
                worker.start(&tracker, &self.inner.runtime);
                worker
            })
            .collect();
        state.tracker = Some(tracker);
        state.running = true;
    }

    /// Stop every worker and wait for their loops to exit, bounded by `ctx`.
    ///
    /// Workers finish the job they are running but take no new one. If `ctx`
    /// is done before they all exit, a warning is logged and the call returns
    /// anyway; the remaining worker tasks are left to finish on their own.
    /// The dispatcher is not running once this returns. No-op if not running.
    pub async fn stop(&self, ctx: &JobContext) {
        let (workers, tracker) = {
            let mut state = self.state();
            if !state.running {
                return;
            }
            state.running = false;
            (std::mem::take(&mut state.workers), state.tracker.take())
        };

        info!("Stopping job dispatcher");
        for worker in &workers {
            worker.stop();
        }

        let Some(tracker) = tracker else {
            return;
        };
        tracker.close();

        tokio::select! {
            biased;
            () = tracker.wait() => info!("All workers finished successfully"),
            () = ctx.cancelled() => warn!(
                pending_workers = tracker.len(),
                "Context cancelled before all workers finished"
            ),
        }
    }

    /// Queue a job for the worker pool, fire-and-forget.
    ///
    /// Dropped with a warning when the dispatcher is not running. Suspends
    /// the caller while the queue is full.
    pub async fn dispatch_job<J: Job>(&self, job: J) {
        let job_id = job.id();
        let job_name = job.name().to_owned();

        if !self.is_running() {
            warn!(
                %job_id,
                job_name,
                "Cannot dispatch job: dispatcher is not running"
            );
            JOB_REJECTED.with_label_values(&[&job_name]).inc();
            return;
        }

        info!(%job_id, job_name, "Dispatching job");
        if self.inner.sender.send(Box::new(job)).await.is_err() {
            error!(%job_id, job_name, "Job queue closed, job dropped");
            JOB_REJECTED.with_label_values(&[&job_name]).inc();
            return;
        }
        JOB_DISPATCHED.with_label_values(&[&job_name]).inc();
    }

    /// Queue a job without waiting for room in the queue.
    ///
    /// Unlike [`dispatch_job`](Self::dispatch_job), a full queue is reported
    /// back instead of suspending the caller.
    pub fn try_dispatch_job<J: Job>(&self, job: J) -> Result<(), DispatchError> {
        let job_id = job.id();
        let job_name = job.name().to_owned();

        if !self.is_running() {
            JOB_REJECTED.with_label_values(&[&job_name]).inc();
            return NotRunningSnafu { job_id }.fail();
        }

        match self.inner.sender.try_send(Box::new(job)) {
            Ok(()) => {
                info!(%job_id, job_name, "Dispatching job");
                JOB_DISPATCHED.with_label_values(&[&job_name]).inc();
                Ok(())
            }
            Err(e) => {
                JOB_REJECTED.with_label_values(&[&job_name]).inc();
                match e {
                    TrySendError::Full(_) => QueueFullSnafu {
                        job_id,
                        capacity: self.inner.queue_capacity,
                    }
                    .fail(),
                    TrySendError::Closed(_) => ClosedSnafu.fail(),
                }
            }
        }
    }

    /// Run a job right now on the caller's task, bypassing queue and workers.
    ///
    /// Works whether or not the dispatcher is running and returns exactly
    /// what the job returned.
    pub async fn run_job<J: Job + ?Sized>(&self, ctx: &JobContext, job: &J) -> JobResult {
        info!(job_id = %job.id(), job_name = job.name(), "Running job immediately");
        job.execute(ctx).await
    }

    pub fn is_running(&self) -> bool { self.state().running }

    pub fn worker_count(&self) -> usize { self.inner.worker_count }

    pub fn queue_capacity(&self) -> usize { self.inner.queue_capacity }

    /// Number of jobs waiting in the queue.
    pub fn queued_jobs(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    pub(crate) fn runtime(&self) -> &Handle { &self.inner.runtime }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_count", &self.inner.worker_count)
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("job_timeout", &self.inner.job_timeout)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
