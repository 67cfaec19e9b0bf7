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
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    dispatcher::Dispatcher,
    id::JobId,
    job::{FnJob, JobAction},
    metrics::SCHEDULED_JOB_TICKS,
    schedule::{Schedule, ScheduleDriver},
};

/// Periodically feeds a fresh [`FnJob`] into a [`Dispatcher`].
///
/// Every firing builds a new job with a new id and the same name and action.
/// One job is dispatched as soon as the scheduled job starts, then one per
/// schedule tick. Dispatches go through
/// [`Dispatcher::dispatch_job`](Dispatcher::dispatch_job), so a full queue
/// holds back the next tick; ticks missed meanwhile are dropped.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use kiln_common_jobs::{Dispatcher, ScheduledJob, action};
///
/// # #[tokio::main]
/// # async fn main() {
/// let dispatcher = Dispatcher::new(2);
/// dispatcher.start();
///
/// let cleanup = ScheduledJob::new(
///     "session-cleanup",
///     Duration::from_secs(60),
///     action(|_ctx| async { Ok(()) }),
///     dispatcher.clone(),
/// );
/// cleanup.start();
/// // ...
/// cleanup.stop();
/// # }
/// ```
pub struct ScheduledJob {
    id:         JobId,
    name:       String,
    schedule:   Schedule,
    action:     JobAction,
    dispatcher: Dispatcher,
    state:      Mutex<State>,
}

#[derive(Default)]
struct State {
    running: bool,
    cancel:  CancellationToken,
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        action: JobAction,
        dispatcher: Dispatcher,
    ) -> Self {
        ScheduledJob {
            id: JobId::new(),
            name: name.into(),
            schedule: schedule.into(),
            action,
            dispatcher,
            state: Mutex::new(State::default()),
        }
    }

    pub const fn id(&self) -> JobId { self.id }

    pub fn name(&self) -> &str { &self.name }

    pub const fn schedule(&self) -> &Schedule { &self.schedule }

    pub fn is_running(&self) -> bool { self.state().running }

    /// Dispatch one job now and keep dispatching on every tick until
    /// [`stop`](Self::stop). No-op if already running.
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }

        let cancel = CancellationToken::new();
        state.cancel = cancel.clone();
        state.running = true;

        info!(
            scheduled_job_id = %self.id,
            job_name = self.name,
            schedule = ?self.schedule,
            "Starting scheduled job"
        );

        self.dispatcher.runtime().spawn(run_schedule(
            self.name.clone(),
            self.schedule.clone(),
            Arc::clone(&self.action),
            self.dispatcher.clone(),
            cancel,
        ));
    }

    /// Stop producing jobs. Jobs already queued still run. No-op if not
    /// running.
    pub fn stop(&self) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.cancel.cancel();
        state.running = false;
        info!(scheduled_job_id = %self.id, job_name = self.name, "Stopped scheduled job");
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel
            .cancel();
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn run_schedule(
    name: String,
    schedule: Schedule,
    action: JobAction,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    let mut driver = ScheduleDriver::new(&schedule);
    loop {
        let job = FnJob::from_action(name.clone(), Arc::clone(&action));
        SCHEDULED_JOB_TICKS.with_label_values(&[&name]).inc();

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = dispatcher.dispatch_job(job) => {}
        }

        if !driver.wait_next(&cancel).await {
            break;
        }
    }
    debug!(job_name = name, "Scheduled job loop exited");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{context::JobContext, job::action};

    #[tokio::test]
    async fn start_fires_immediately_and_stop_halts() {
        let dispatcher = Dispatcher::new(1);
        dispatcher.start();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let job = ScheduledJob::new(
            "unit-scheduled-immediate",
            Duration::from_secs(3600),
            action(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            dispatcher.clone(),
        );

        job.start();
        job.start();
        assert!(job.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        job.stop();
        job.stop();
        assert!(!job.is_running());

        // A restart gets a fresh token and fires again.
        job.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        job.stop();

        dispatcher.stop(&JobContext::new()).await;
    }
}
