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

//! In-process background job execution.
//!
//! This crate provides a small job system with:
//! - **Worker pool**: a fixed number of workers draining one bounded FIFO
//!   queue
//! - **Back-pressure**: producers are suspended while the queue is full
//! - **Cooperative cancellation**: every job gets a [`JobContext`] carrying a
//!   cancellation token and a deadline
//! - **Failure isolation**: errors and panics are logged and counted, never
//!   retried, and never take a worker down
//! - **Scheduling**: [`ScheduledJob`] feeds the dispatcher on an interval or a
//!   cron expression
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use kiln_common_jobs::{Dispatcher, FnJob, JobContext, JobError};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = Dispatcher::new(4);
//!     dispatcher.start();
//!
//!     dispatcher
//!         .dispatch_job(FnJob::new("resize-avatar", |ctx| async move {
//!             if ctx.is_cancelled() {
//!                 return Err(JobError::cancelled());
//!             }
//!             Ok(())
//!         }))
//!         .await;
//!
//!     // Graceful shutdown, bounded to 10 seconds
//!     let shutdown = JobContext::new().with_timeout(Duration::from_secs(10));
//!     dispatcher.stop(&shutdown).await;
//! }
//! ```
//!
//! # Architecture
//!
//! - [`Job`]: Trait for a unit of work, [`FnJob`] adapts a closure
//! - [`Dispatcher`]: Owns the queue and the worker pool
//! - [`ScheduledJob`]: Produces a fresh job per [`Schedule`] tick
//! - [`JobContext`]: Cancellation and deadline seen by a running job

mod config;
mod context;
mod dispatcher;
mod err;
mod id;
mod job;
pub mod metrics;
mod schedule;
mod scheduled;
mod worker;

pub use config::{DEFAULT_JOB_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT, DispatcherConfig};
pub use context::JobContext;
pub use dispatcher::Dispatcher;
pub use err::{DispatchError, JobError, JobResult};
pub use id::JobId;
pub use job::{FnJob, Job, JobAction, action};
pub use schedule::{CronParseError, Schedule};
pub use scheduled::ScheduledJob;
