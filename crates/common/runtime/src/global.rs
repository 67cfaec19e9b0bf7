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

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

use crate::options::{RuntimeOptions, background_threads};

static BACKGROUND_RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Shared runtime for work started outside any tokio context, built on first
/// use with one thread per two CPUs and threads named `kiln-bg-{n}`.
///
/// # Panics
/// Panics if the runtime cannot be built.
#[must_use]
pub fn background_runtime() -> Arc<Runtime> {
    Arc::clone(BACKGROUND_RUNTIME.get_or_init(|| {
        let options = RuntimeOptions::builder()
            .thread_name("kiln-bg".to_string())
            .worker_threads(background_threads())
            .build();
        Arc::new(options.create().expect("Failed to create background runtime"))
    }))
}
