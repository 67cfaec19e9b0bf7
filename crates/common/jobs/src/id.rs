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

//! Unique identifier for jobs.

use derive_more::{Debug, Display};
use uuid::Uuid;

/// Opaque unique identifier of a job.
///
/// Every [`FnJob`](crate::FnJob) gets a fresh id at construction, and a
/// [`ScheduledJob`](crate::ScheduledJob) mints a new one per firing, so two
/// executions never share an id. The id renders as a hyphenated UUID string
/// in logs.
///
/// ```rust
/// use kiln_common_jobs::JobId;
///
/// let a = JobId::new();
/// let b = JobId::new();
/// assert_ne!(a, b);
/// assert_eq!(a.to_string().len(), 36);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[debug("JobId({_0})")]
#[display("{_0}")]
pub struct JobId(Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self { Self(Uuid::new_v4()) }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl Default for JobId {
    fn default() -> Self { Self::new() }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self { Self(value) }
}
