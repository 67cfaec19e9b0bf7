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
    sync::atomic::{AtomicUsize, Ordering},
    thread::available_parallelism,
};

use bon::Builder;
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};

use crate::error::{self, Result};

/// Settings for a multi-thread runtime with IO and timers enabled.
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct RuntimeOptions {
    /// Defaults to one thread per CPU. Zero is raised to one.
    pub worker_threads: Option<usize>,

    /// Threads are named `{thread_name}-{n}`, counting from zero.
    #[default("kiln-rt".to_string())]
    #[builder(default = "kiln-rt".to_string())]
    pub thread_name: String,
}

impl RuntimeOptions {
    pub fn create(self) -> Result<Runtime> {
        let worker_threads = self.worker_threads.unwrap_or_else(cpu_threads).max(1);
        let counter = AtomicUsize::new(0);
        let thread_name = self.thread_name;

        TokioBuilder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .thread_name_fn(move || {
                format!("{thread_name}-{}", counter.fetch_add(1, Ordering::SeqCst))
            })
            .build()
            .context(error::BuildSnafu)
    }
}

pub(crate) fn cpu_threads() -> usize { available_parallelism().map_or(1, std::num::NonZero::get) }

pub(crate) fn background_threads() -> usize { (cpu_threads() / 2).max(1) }
