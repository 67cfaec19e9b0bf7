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

//! Tokio runtime construction.
//!
//! Services normally run on a runtime built from [`RuntimeOptions`]. The
//! lazily built background runtime only hosts work started from plain
//! threads, such as a job dispatcher created outside any runtime.

mod error;
mod global;
mod options;

pub use error::{Error, Result};
pub use global::background_runtime;
pub use options::RuntimeOptions;
pub use tokio::runtime::Runtime;
