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

//! Example demonstrating the job dispatcher
//!
//! This example shows:
//! - Dispatching closure jobs and trait-object jobs
//! - A failing job that does not disturb the pool
//! - Running a job synchronously
//! - Interval and cron scheduled jobs
//! - Graceful shutdown bounded by a deadline

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use kiln_common_jobs::{
    Dispatcher, FnJob, Job, JobContext, JobError, JobId, JobResult, Schedule, ScheduledJob,
    action,
};

// Example 1: A job implemented as a type
struct SendEmail {
    id: JobId,
    to: String,
}

#[async_trait::async_trait]
impl Job for SendEmail {
    fn id(&self) -> JobId { self.id }

    fn name(&self) -> &str { "send-email" }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        tokio::select! {
            () = ctx.cancelled() => Err(JobError::cancelled()),
            () = tokio::time::sleep(Duration::from_millis(100)) => {
                tracing::info!(to = self.to, "Email sent");
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let dispatcher = Dispatcher::new(2);
    dispatcher.start();

    // Example 1: Trait jobs
    for to in ["alice@example.com", "bob@example.com"] {
        dispatcher
            .dispatch_job(SendEmail {
                id: JobId::new(),
                to: to.to_string(),
            })
            .await;
    }

    // Example 2: A failing closure job is logged, the workers keep going
    dispatcher
        .dispatch_job(FnJob::new("flaky-import", |_ctx| async {
            Err(JobError::failed("upstream returned 503"))
        }))
        .await;

    // Example 3: Run a job in place and inspect its result
    let report = FnJob::new("build-report", |_ctx| async { Ok(()) });
    match dispatcher.run_job(&JobContext::new(), &report).await {
        Ok(()) => tracing::info!("Report built"),
        Err(e) => tracing::error!(error = %e, "Report failed"),
    }

    // Example 4: Scheduled jobs
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let heartbeat = ScheduledJob::new(
        "heartbeat",
        Duration::from_millis(500),
        action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        dispatcher.clone(),
    );
    heartbeat.start();

    // Run every minute
    let nightly = ScheduledJob::new(
        "minutely-cleanup",
        Schedule::cron("* * * * *").expect("Valid cron expression"),
        action(|_ctx| async { Ok(()) }),
        dispatcher.clone(),
    );
    nightly.start();

    tokio::time::sleep(Duration::from_secs(2)).await;
    heartbeat.stop();
    nightly.stop();
    tracing::info!(ticks = ticks.load(Ordering::SeqCst), "Heartbeat stopped");

    let shutdown = JobContext::new().with_timeout(Duration::from_secs(5));
    dispatcher.stop(&shutdown).await;
}
