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
    collections::HashSet,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use kiln_common_jobs::{
    Dispatcher, DispatcherConfig, FnJob, Job, JobContext, JobError, JobId, JobResult,
    ScheduledJob, action,
};
use tokio::{sync::Notify, time::sleep};
use tracing_subscriber::fmt::MakeWriter;

/// Captures formatted log output of the current thread.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String { String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned() }

    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer { self.clone() }
}

/// A job that records its own id when executed.
struct RecordingJob {
    id:       JobId,
    name:     &'static str,
    executed: Arc<Mutex<Vec<JobId>>>,
    delay:    Duration,
    fail:     Option<&'static str>,
}

impl RecordingJob {
    fn new(name: &'static str, executed: &Arc<Mutex<Vec<JobId>>>) -> Self {
        RecordingJob {
            id: JobId::new(),
            name,
            executed: Arc::clone(executed),
            delay: Duration::ZERO,
            fail: None,
        }
    }
}

#[async_trait::async_trait]
impl Job for RecordingJob {
    fn id(&self) -> JobId { self.id }

    fn name(&self) -> &str { self.name }

    async fn execute(&self, _ctx: &JobContext) -> JobResult {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.executed.lock().unwrap().push(self.id);
        match self.fail {
            Some(message) => Err(JobError::failed(message)),
            None => Ok(()),
        }
    }
}

fn counting_job(name: &'static str, counter: &Arc<AtomicUsize>) -> FnJob {
    let counter = Arc::clone(counter);
    FnJob::new(name, move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

async fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() && start.elapsed() < deadline {
        sleep(Duration::from_millis(5)).await;
    }
}

fn job_ids_for(logs: &str, message: &str, job_name: &str) -> Vec<String> {
    let name_field = format!("job_name=\"{job_name}\"");
    logs.lines()
        .filter(|line| line.contains(message) && line.contains(&name_field))
        .filter_map(|line| {
            let rest = line.split("job_id=").nth(1)?;
            rest.split_whitespace().next().map(str::to_owned)
        })
        .collect()
}

#[tokio::test]
async fn test_every_job_executes_exactly_once() {
    let dispatcher = Dispatcher::new(3);
    dispatcher.start();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut submitted = Vec::new();
    for _ in 0..(3 + 7) {
        let job = RecordingJob::new("it-exactly-once", &executed);
        submitted.push(job.id());
        dispatcher.dispatch_job(job).await;
    }

    wait_until(Duration::from_secs(2), || executed.lock().unwrap().len() >= 10).await;
    dispatcher.stop(&JobContext::new()).await;

    let executed = executed.lock().unwrap();
    assert_eq!(executed.len(), 10);
    let unique: HashSet<_> = executed.iter().copied().collect();
    assert_eq!(unique, submitted.into_iter().collect());
}

#[tokio::test]
async fn test_dispatch_outside_running_never_executes() {
    let dispatcher = Dispatcher::new(2);
    let counter = Arc::new(AtomicUsize::new(0));

    dispatcher
        .dispatch_job(counting_job("it-not-running", &counter))
        .await;
    dispatcher.start();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    dispatcher.stop(&JobContext::new()).await;
    dispatcher
        .dispatch_job(counting_job("it-not-running", &counter))
        .await;
    sleep(Duration::from_millis(30)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.queued_jobs(), 0);
}

#[tokio::test]
async fn test_run_job_returns_exact_error() {
    let dispatcher = Dispatcher::new(1);

    let ok = FnJob::new("it-run-ok", |_ctx| async { Ok(()) });
    assert!(dispatcher.run_job(&JobContext::new(), &ok).await.is_ok());

    let failing = FnJob::new("it-run-fail", |_ctx| async {
        Err(JobError::failed("disk quota exceeded"))
    });
    let err = dispatcher
        .run_job(&JobContext::new(), &failing)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Failed { .. }));
    assert_eq!(err.to_string(), "disk quota exceeded");

    // The caller's context reaches the job unchanged.
    let ctx = JobContext::new();
    ctx.cancel();
    let cooperative = FnJob::new("it-run-cancel", |ctx| async move {
        if ctx.is_cancelled() {
            Err(JobError::cancelled())
        } else {
            Ok(())
        }
    });
    assert!(
        dispatcher
            .run_job(&ctx, &cooperative)
            .await
            .unwrap_err()
            .is_cancellation()
    );
}

#[tokio::test]
async fn test_stop_with_expired_context_returns_promptly() {
    let dispatcher = Dispatcher::new(1);
    dispatcher.start();

    dispatcher
        .dispatch_job(FnJob::new("it-stubborn", |_ctx| async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        }))
        .await;
    sleep(Duration::from_millis(20)).await;

    let expired = JobContext::new();
    expired.cancel();

    let start = Instant::now();
    dispatcher.stop(&expired).await;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn test_stop_waits_for_running_job() {
    let dispatcher = Dispatcher::new(1);
    dispatcher.start();

    let counter = Arc::new(AtomicUsize::new(0));
    let finished = Arc::clone(&counter);
    dispatcher
        .dispatch_job(FnJob::new("it-graceful", move |_ctx| {
            let finished = Arc::clone(&finished);
            async move {
                sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .await;
    sleep(Duration::from_millis(10)).await;

    dispatcher
        .stop(&JobContext::new().with_timeout(Duration::from_secs(2)))
        .await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_double_start_and_stop_are_idempotent() {
    let dispatcher = Dispatcher::new(2);
    dispatcher.stop(&JobContext::new()).await;

    dispatcher.start();
    dispatcher.start();
    assert!(dispatcher.is_running());

    dispatcher.stop(&JobContext::new()).await;
    dispatcher.stop(&JobContext::new()).await;
    assert!(!dispatcher.is_running());

    // Restart works and runs jobs again.
    let counter = Arc::new(AtomicUsize::new(0));
    dispatcher.start();
    dispatcher
        .dispatch_job(counting_job("it-restart", &counter))
        .await;
    wait_until(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    dispatcher.stop(&JobContext::new()).await;
}

#[tokio::test]
async fn test_full_queue_suspends_producer() {
    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::builder()
            .worker_count(1)
            .queue_capacity(1)
            .build(),
    );
    dispatcher.start();

    let gate = Arc::new(Notify::new());
    let release = Arc::clone(&gate);
    dispatcher
        .dispatch_job(FnJob::new("it-backpressure-blocker", move |_ctx| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(())
            }
        }))
        .await;
    sleep(Duration::from_millis(20)).await;

    let counter = Arc::new(AtomicUsize::new(0));
    dispatcher
        .dispatch_job(counting_job("it-backpressure", &counter))
        .await;
    assert_eq!(dispatcher.queued_jobs(), 1);

    let suspended = tokio::time::timeout(
        Duration::from_millis(50),
        dispatcher.dispatch_job(counting_job("it-backpressure", &counter)),
    )
    .await;
    assert!(suspended.is_err(), "dispatch should wait for queue room");

    gate.notify_one();
    dispatcher
        .dispatch_job(counting_job("it-backpressure", &counter))
        .await;
    wait_until(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    dispatcher.stop(&JobContext::new()).await;
}

#[tokio::test]
async fn test_two_workers_one_failure_scenario() {
    let logs = LogBuffer::default();
    let _guard = logs.install();

    let dispatcher = Dispatcher::new(2);
    dispatcher.start();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let mut submitted = Vec::new();
    for i in 1..=5 {
        let mut job = RecordingJob::new("it-scenario", &executed);
        if i == 3 {
            job.delay = Duration::from_millis(50);
            job.fail = Some("boom");
        }
        submitted.push(job.id());
        dispatcher.dispatch_job(job).await;
    }

    wait_until(Duration::from_secs(2), || executed.lock().unwrap().len() >= 5).await;
    dispatcher
        .stop(&JobContext::new().with_timeout(Duration::from_secs(1)))
        .await;

    let executed = executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 5);
    assert_eq!(
        executed.iter().copied().collect::<HashSet<_>>(),
        submitted.iter().copied().collect::<HashSet<_>>()
    );

    let output = logs.contents();
    assert_eq!(job_ids_for(&output, "Job completed successfully", "it-scenario").len(), 4);
    let failures = job_ids_for(&output, "Failed to process job", "it-scenario");
    assert_eq!(failures, vec![submitted[2].to_string()]);
    assert!(output.contains("error=boom"));
    for id in &submitted {
        assert!(output.contains(&id.to_string()), "missing log for {id}");
    }
    assert!(output.contains("All workers finished successfully"));
}

#[tokio::test]
async fn test_scheduled_job_fires_with_distinct_ids() {
    let logs = LogBuffer::default();
    let _guard = logs.install();

    let dispatcher = Dispatcher::new(2);
    dispatcher.start();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let interval = Duration::from_millis(40);
    let scheduled = ScheduledJob::new(
        "it-scheduled",
        interval,
        action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        dispatcher.clone(),
    );

    scheduled.start();
    sleep(interval * 3 + Duration::from_millis(50)).await;
    scheduled.stop();
    assert!(!scheduled.is_running());
    sleep(Duration::from_millis(20)).await;

    let fired = runs.load(Ordering::SeqCst);
    assert!(fired >= 4, "expected at least 4 firings, got {fired}");

    let ids = job_ids_for(&logs.contents(), "Processing job", "it-scheduled");
    assert_eq!(ids.len(), fired);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
    assert!(!ids.contains(&scheduled.id().to_string()));

    // No more firings once stopped.
    sleep(interval * 2).await;
    assert_eq!(runs.load(Ordering::SeqCst), fired);

    dispatcher.stop(&JobContext::new()).await;
}

#[tokio::test]
async fn test_scheduled_job_skips_ticks_while_queue_is_full() {
    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::builder()
            .worker_count(1)
            .queue_capacity(1)
            .build(),
    );
    dispatcher.start();

    // Hold the only worker so nothing drains the queue.
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));
    let (release, entered) = (Arc::clone(&gate), Arc::clone(&started));
    dispatcher
        .dispatch_job(FnJob::new("it-backpressure-blocker", move |_ctx| {
            let (release, entered) = (Arc::clone(&release), Arc::clone(&entered));
            async move {
                entered.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok(())
            }
        }))
        .await;
    wait_until(Duration::from_secs(1), || started.load(Ordering::SeqCst) == 1).await;

    let name = "it-scheduled-backpressure";
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let scheduled = ScheduledJob::new(
        name,
        Duration::from_millis(10),
        action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        dispatcher.clone(),
    );
    scheduled.start();
    sleep(Duration::from_millis(200)).await;

    // One job sits in the queue and one dispatch is suspended on it; the
    // twenty or so ticks that came due meanwhile were never produced.
    let ticks = kiln_common_jobs::metrics::SCHEDULED_JOB_TICKS
        .with_label_values(&[name])
        .get();
    assert_eq!(ticks, 2);
    assert_eq!(dispatcher.queued_jobs(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    gate.notify_one();
    sleep(Duration::from_millis(30)).await;
    scheduled.stop();
    sleep(Duration::from_millis(20)).await;

    let fired = runs.load(Ordering::SeqCst);
    assert!(fired >= 2, "queued and suspended jobs should run, got {fired}");
    assert!(fired <= 8, "missed ticks were replayed: {fired} firings");

    dispatcher.stop(&JobContext::new()).await;
}

#[tokio::test]
async fn test_scheduled_job_on_stopped_dispatcher_drops_jobs() {
    let dispatcher = Dispatcher::new(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let scheduled = ScheduledJob::new(
        "it-scheduled-dropped",
        Duration::from_millis(20),
        action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        dispatcher.clone(),
    );

    scheduled.start();
    sleep(Duration::from_millis(70)).await;
    scheduled.stop();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
