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

use std::{fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::{context::JobContext, err::JobResult, id::JobId};

/// Shared, re-invocable job body.
///
/// Reference counted so a [`ScheduledJob`](crate::ScheduledJob) can hand the
/// same action to a fresh [`FnJob`] on every firing.
pub type JobAction = Arc<dyn Fn(JobContext) -> BoxFuture<'static, JobResult> + Send + Sync>;

/// A unit of background work.
///
/// Implementors only describe a single execution. Queueing, worker
/// assignment, the per-job deadline and outcome logging are handled by the
/// [`Dispatcher`](crate::Dispatcher).
///
/// `execute` should return promptly once `ctx` is done; the worker signals
/// cancellation through the context but never aborts the future.
#[async_trait::async_trait]
pub trait Job: Send + Sync + 'static {
    /// Unique identity of this job instance.
    fn id(&self) -> JobId;

    /// Human-readable name, shared by every firing of a scheduled job.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &JobContext) -> JobResult;
}

#[async_trait::async_trait]
impl<J: Job + ?Sized> Job for Box<J> {
    fn id(&self) -> JobId { (**self).id() }

    fn name(&self) -> &str { (**self).name() }

    async fn execute(&self, ctx: &JobContext) -> JobResult { (**self).execute(ctx).await }
}

/// Wrap an async closure into a [`JobAction`].
pub fn action<F, Fut>(f: F) -> JobAction
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// A job backed by a closure.
///
/// ```rust
/// use kiln_common_jobs::{FnJob, Job};
///
/// let job = FnJob::new("send-welcome-email", |_ctx| async { Ok(()) });
/// assert_eq!(job.name(), "send-welcome-email");
/// ```
#[derive(Clone)]
pub struct FnJob {
    id:     JobId,
    name:   String,
    action: JobAction,
}

impl FnJob {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        Self::from_action(name, action(f))
    }

    /// Build a job around an existing action with a fresh id.
    pub fn from_action(name: impl Into<String>, action: JobAction) -> Self {
        FnJob {
            id: JobId::new(),
            name: name.into(),
            action,
        }
    }
}

impl fmt::Debug for FnJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Job for FnJob {
    fn id(&self) -> JobId { self.id }

    fn name(&self) -> &str { &self.name }

    async fn execute(&self, ctx: &JobContext) -> JobResult { (self.action)(ctx.clone()).await }
}
