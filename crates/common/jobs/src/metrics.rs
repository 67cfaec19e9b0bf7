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

//! Prometheus metrics for the job subsystem, registered in the default
//! registry and labelled by job name.

use std::sync::LazyLock;

use prometheus::{
    HistogramVec, IntCounterVec, IntGauge, register_histogram_vec, register_int_counter_vec,
    register_int_gauge,
};

pub const JOB_LABEL: &str = "job";

pub static JOB_DISPATCHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "job_dispatched_total",
        "Total number of jobs accepted onto the queue",
        &[JOB_LABEL]
    )
    .unwrap()
});

pub static JOB_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "job_rejected_total",
        "Total number of jobs dropped because the dispatcher was not running or the queue was full",
        &[JOB_LABEL]
    )
    .unwrap()
});

pub static JOB_EXECUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "job_executions_total",
        "Total number of jobs that completed successfully",
        &[JOB_LABEL]
    )
    .unwrap()
});

pub static JOB_EXECUTION_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "job_execution_errors_total",
        "Total number of jobs that returned an error",
        &[JOB_LABEL]
    )
    .unwrap()
});

pub static JOB_EXECUTION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "job_execution_duration_seconds",
        "Job execution duration in seconds",
        &[JOB_LABEL]
    )
    .unwrap()
});

pub static JOB_WORKERS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "job_workers_active",
        "Number of worker loops currently running"
    )
    .unwrap()
});

pub static SCHEDULED_JOB_TICKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "scheduled_job_ticks_total",
        "Total number of times a scheduled job produced a job",
        &[JOB_LABEL]
    )
    .unwrap()
});
