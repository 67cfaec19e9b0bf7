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

use std::time::Duration;

use snafu::{IntoError, Snafu};

use crate::id::JobId;

// ============================================================================
// Job Error Types
// ============================================================================

/// Result type returned by [`Job::execute`](crate::Job::execute).
pub type JobResult<T = ()> = std::result::Result<T, JobError>;

/// Errors a job can report from `execute()`.
///
/// A failed job is logged by the worker that ran it and then dropped: there
/// is no retry, and the error never reaches whoever dispatched the job. Only
/// [`Dispatcher::run_job`](crate::Dispatcher::run_job) hands the error back
/// to its caller.
///
/// # Example
///
/// ```rust
/// use kiln_common_jobs::{JobContext, JobError, JobResult};
///
/// async fn sync_accounts(ctx: &JobContext) -> JobResult {
///     if ctx.is_cancelled() {
///         return Err(JobError::cancelled());
///     }
///     let body = std::fs::read_to_string("/nonexistent")
///         .map_err(|e| JobError::external("reading account export", e))?;
///     if body.is_empty() {
///         return Err(JobError::failed("empty export"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// The job ran and reported a failure.
    #[snafu(display("{message}"))]
    Failed {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// A collaborator the job called into (database, cache, remote API)
    /// returned an error.
    #[snafu(display("{message}: {source}"))]
    External {
        message: String,
        source:  Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// The job observed its context being cancelled and gave up.
    #[snafu(display("job cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// The job observed its deadline passing and gave up.
    #[snafu(display("job exceeded its deadline of {timeout:?}"))]
    DeadlineExceeded {
        timeout: Duration,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}

impl JobError {
    /// Creates a plain failure with a message.
    #[track_caller]
    pub fn failed(message: impl Into<String>) -> Self {
        FailedSnafu {
            message: message.into(),
        }
        .build()
    }

    /// Wraps an error coming from a collaborator.
    #[track_caller]
    pub fn external<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let source: Box<dyn std::error::Error + Send + Sync> = Box::new(source);
        ExternalSnafu {
            message: message.into(),
        }
        .into_error(source)
    }

    #[track_caller]
    pub fn cancelled() -> Self { CancelledSnafu.build() }

    #[track_caller]
    pub fn deadline_exceeded(timeout: Duration) -> Self { DeadlineExceededSnafu { timeout }.build() }

    /// Returns `true` if the job stopped because its context was done.
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            JobError::Cancelled { .. } | JobError::DeadlineExceeded { .. }
        )
    }
}

// ============================================================================
// Dispatch Error
// ============================================================================

/// Rejections reported by
/// [`Dispatcher::try_dispatch_job`](crate::Dispatcher::try_dispatch_job).
///
/// The blocking [`Dispatcher::dispatch_job`](crate::Dispatcher::dispatch_job)
/// never returns these; it logs and drops instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    #[snafu(display("dispatcher is not running, job {job_id} dropped"))]
    NotRunning {
        job_id: JobId,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("job queue is full ({capacity} pending), job {job_id} rejected"))]
    QueueFull {
        job_id:   JobId,
        capacity: usize,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("job queue is closed"))]
    Closed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}
