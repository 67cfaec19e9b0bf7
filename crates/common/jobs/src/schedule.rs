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

use std::{str::FromStr, time::Duration};

use snafu::{ResultExt, Snafu};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Schedule
// ============================================================================

/// When a [`ScheduledJob`](crate::ScheduledJob) produces its jobs.
///
/// Both variants fire once immediately when the scheduled job starts.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use kiln_common_jobs::Schedule;
///
/// // Every five minutes
/// let every = Schedule::Interval(Duration::from_secs(300));
///
/// // Every day at 03:00 UTC
/// let nightly = Schedule::cron("0 3 * * *").unwrap();
/// ```
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire at a fixed interval. Ticks that come due while the previous
    /// dispatch is still waiting on a full queue are skipped, not replayed.
    Interval(Duration),

    /// Fire on a cron schedule, standard 5-field format:
    /// `minute hour day month weekday`.
    Cron(croner::Cron),
}

impl Schedule {
    /// Parse a cron expression into a schedule.
    pub fn cron(expression: &str) -> Result<Self, CronParseError> {
        croner::Cron::from_str(expression)
            .context(InvalidExpressionSnafu { expression })
            .map(Schedule::Cron)
    }
}

impl From<Duration> for Schedule {
    fn from(interval: Duration) -> Self { Schedule::Interval(interval) }
}

/// Errors that can occur when parsing cron expressions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CronParseError {
    #[snafu(display("Failed to parse cron expression {expression:?}: {source}"))]
    InvalidExpression {
        expression: String,
        source:     croner::errors::CronError,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },
}

// ============================================================================
// Drivers
// ============================================================================

/// Waits for the next firing of a schedule.
pub(crate) enum ScheduleDriver {
    Interval(IntervalDriver),
    Cron(CronDriver),
}

impl ScheduleDriver {
    pub(crate) fn new(schedule: &Schedule) -> Self {
        match schedule {
            Schedule::Interval(period) => ScheduleDriver::Interval(IntervalDriver::new(*period)),
            Schedule::Cron(cron) => ScheduleDriver::Cron(CronDriver::new(cron.clone())),
        }
    }

    /// Wait for the next firing. Returns false once `cancel` fires.
    pub(crate) async fn wait_next(&mut self, cancel: &CancellationToken) -> bool {
        match self {
            ScheduleDriver::Interval(d) => d.wait_next(cancel).await,
            ScheduleDriver::Cron(d) => d.wait_next(cancel).await,
        }
    }
}

pub(crate) struct IntervalDriver {
    interval: tokio::time::Interval,
}

impl IntervalDriver {
    fn new(period: Duration) -> Self {
        // The immediate firing is done by the caller, so the first tick is
        // one full period away. Zero periods would panic inside tokio.
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        IntervalDriver { interval }
    }

    async fn wait_next(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            _ = self.interval.tick() => true,
        }
    }
}

pub(crate) struct CronDriver {
    cron: croner::Cron,
}

impl CronDriver {
    const fn new(cron: croner::Cron) -> Self { CronDriver { cron } }

    async fn wait_next(&mut self, cancel: &CancellationToken) -> bool {
        let now = chrono::Utc::now();
        let Ok(next) = self.cron.find_next_occurrence(&now, false) else {
            // No more occurrences, park until cancelled
            cancel.cancelled().await;
            return false;
        };

        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
