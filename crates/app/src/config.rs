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

//! Layered application configuration.
//!
//! Values are resolved in this order, later layers winning:
//! 1. built-in defaults
//! 2. `<dir>/config.toml`
//! 3. `<dir>/<environment>.toml`
//! 4. environment variables
//!
//! Missing files are skipped. Tables from the environment file are merged
//! into the base file key by key.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use bon::Builder;
use kiln_common_jobs::DispatcherConfig;
use kiln_common_telemetry::LoggingOptions;
use kiln_server::http::RestServerConfig;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu};

pub const DEFAULT_CONFIG_DIR: &str = "configs";
pub const BASE_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_ENVIRONMENT: &str = "development";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Failed to read config file {}", path.display()))]
    Read {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to parse config file {}", path.display()))]
    Parse {
        path:   PathBuf,
        source: toml::de::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid value {value:?} for environment variable {key}: {reason}"))]
    Env {
        key:    String,
        value:  String,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to render configuration"))]
    Render {
        source: toml::ser::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Configuration for the application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct AppConfig {
    #[builder(default)]
    pub server:  ServerConfig,
    #[builder(default)]
    pub logging: LoggingOptions,
    #[builder(default)]
    pub jobs:    JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct ServerConfig {
    #[default(DEFAULT_ENVIRONMENT.to_string())]
    #[builder(default = DEFAULT_ENVIRONMENT.to_string(), into)]
    pub environment:      String,
    /// Bound on the whole shutdown sequence.
    #[serde(with = "humantime_serde")]
    #[default(Duration::from_secs(15))]
    #[builder(default = Duration::from_secs(15))]
    pub shutdown_timeout: Duration,
    #[builder(default)]
    pub http:             RestServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct JobsConfig {
    /// Start the job dispatcher with the application.
    #[default = true]
    #[builder(default = true)]
    pub enabled:        bool,
    #[default(kiln_common_jobs::DEFAULT_WORKER_COUNT)]
    #[builder(default = kiln_common_jobs::DEFAULT_WORKER_COUNT)]
    pub workers:        usize,
    #[default(kiln_common_jobs::DEFAULT_QUEUE_CAPACITY)]
    #[builder(default = kiln_common_jobs::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    #[default(kiln_common_jobs::DEFAULT_JOB_TIMEOUT)]
    #[builder(default = kiln_common_jobs::DEFAULT_JOB_TIMEOUT)]
    pub job_timeout:    Duration,
}

impl JobsConfig {
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::builder()
            .worker_count(self.workers)
            .queue_capacity(self.queue_capacity)
            .job_timeout(self.job_timeout)
            .build()
    }
}

impl AppConfig {
    /// Load configuration from `config_dir` for `environment`, applying
    /// overrides from the process environment.
    pub fn load(config_dir: impl AsRef<Path>, environment: &str) -> Result<Self> {
        Self::load_with(config_dir, environment, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with(
        config_dir: impl AsRef<Path>,
        environment: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let dir = config_dir.as_ref();
        let mut table = toml::Table::new();
        for path in [
            dir.join(BASE_CONFIG_FILE),
            dir.join(format!("{environment}.toml")),
        ] {
            if let Some(layer) = read_table(&path)? {
                merge_tables(&mut table, layer);
            }
        }

        let explicit_environment = table
            .get("server")
            .and_then(|server| server.get("environment"))
            .is_some();

        let mut config: Self = toml::Value::Table(table)
            .try_into()
            .context(ParseSnafu { path: dir })?;
        if !explicit_environment {
            environment.clone_into(&mut config.server.environment);
        }
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context(ParseSnafu {
            path: PathBuf::from("<inline>"),
        })
    }

    pub fn to_toml_string(&self) -> Result<String> { toml::to_string_pretty(self).context(RenderSnafu) }

    /// Apply environment variable overrides. A variable that is set but
    /// cannot be parsed is an error.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = env_value::<u16>(&lookup, "PORT")? {
            self.server.http.set_port(port);
        }
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.server.http.bind_address = addr;
        }
        if let Some(environment) = lookup("ENVIRONMENT") {
            self.server.environment = environment;
        }
        if let Some(timeout) = env_duration(&lookup, "SHUTDOWN_TIMEOUT")? {
            self.server.shutdown_timeout = timeout;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.log_format = parse_log_format(&format)?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.dir = dir;
        }
        if let Some(enabled) = env_value::<bool>(&lookup, "ENABLE_BACKGROUND_JOBS")? {
            self.jobs.enabled = enabled;
        }
        if let Some(workers) = env_value::<usize>(&lookup, "JOB_WORKERS")? {
            self.jobs.workers = workers;
        }
        if let Some(capacity) = env_value::<usize>(&lookup, "JOB_QUEUE_CAPACITY")? {
            self.jobs.queue_capacity = capacity;
        }
        if let Some(timeout) = env_duration(&lookup, "JOB_TIMEOUT")? {
            self.jobs.job_timeout = timeout;
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    let table = content.parse::<toml::Table>().context(ParseSnafu { path })?;
    Ok(Some(table))
}

/// Merge `overlay` into `base`, recursing into nested tables.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn env_value<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                EnvSnafu {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                }
                .build()
            })
        })
        .transpose()
}

fn env_duration(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    lookup(key)
        .map(|value| {
            humantime_serde::re::humantime::parse_duration(value.trim()).map_err(|e| {
                EnvSnafu {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                }
                .build()
            })
        })
        .transpose()
}

fn parse_log_format(value: &str) -> Result<kiln_common_telemetry::LogFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "text" | "console" => Ok(kiln_common_telemetry::LogFormat::Text),
        "json" => Ok(kiln_common_telemetry::LogFormat::Json),
        _ => EnvSnafu {
            key:    "LOG_FORMAT",
            value:  value.to_string(),
            reason: "expected `text` or `json`".to_string(),
        }
        .fail(),
    }
}
