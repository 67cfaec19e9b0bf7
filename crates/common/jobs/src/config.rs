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

use tokio::runtime::Handle;

/// Number of workers used when none is configured.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Maximum number of jobs waiting in the queue before producers are
/// suspended.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Deadline given to each job a worker executes.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, bon::Builder)]
pub struct DispatcherConfig {
    /// Number of worker loops spawned by `start()`. Fixed for the lifetime of
    /// the dispatcher; values below 1 are raised to 1.
    #[builder(default = DEFAULT_WORKER_COUNT)]
    worker_count: usize,

    /// Capacity of the bounded job queue. Values below 1 are raised to 1.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Per-job execution deadline. Cooperative: the job sees its context
    /// expire, nothing aborts it.
    #[builder(default = DEFAULT_JOB_TIMEOUT)]
    job_timeout: Duration,

    /// Runtime that hosts worker and scheduler tasks. Defaults to the
    /// runtime the dispatcher is created on, or the shared background
    /// runtime when created outside of one.
    runtime: Option<Handle>,
}

impl Default for DispatcherConfig {
    fn default() -> Self { Self::builder().build() }
}

impl DispatcherConfig {
    pub(crate) fn worker_count(&self) -> usize { self.worker_count.max(1) }

    pub(crate) fn queue_capacity(&self) -> usize { self.queue_capacity.max(1) }

    pub(crate) const fn job_timeout(&self) -> Duration { self.job_timeout }

    pub(crate) fn runtime(&self) -> Handle {
        self.runtime.clone().unwrap_or_else(|| {
            Handle::try_current()
                .unwrap_or_else(|_| kiln_common_runtime::background_runtime().handle().clone())
        })
    }
}
