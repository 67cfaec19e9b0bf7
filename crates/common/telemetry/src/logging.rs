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

//! Process-wide `tracing` setup.
//!
//! Events go to stdout and, when a log directory is configured, to an
//! hourly-rotated file plus a second file that only receives errors. Records
//! emitted through the `log` crate are bridged into `tracing`.

use std::{
    env,
    io::IsTerminal,
    sync::{Mutex, Once},
};

use bon::Builder;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets `log_format = ""` in a config file mean "use the default format".
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Filter used when neither `LoggingOptions::level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Filter directives such as `"info"` or `"debug,hyper=warn"`. Falls back
    /// to `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log stream. 720 hourly files is 30 days.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log aggregation.
    #[display("json")]
    Json,

    /// Human-readable lines.
    #[default]
    #[display("text")]
    Text,
}

/// Initialize logging for unit tests.
///
/// Logs go to `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) at
/// `UNITTEST_LOG_LEVEL` (default debug). Safe to call from every test.
///
/// # Panics
/// Panics if the guard mutex is poisoned.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.lock().unwrap();

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,tower=warn,reqwest=warn,h2=info".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        *g = Some(init_global_logging("unittest", &opts));

        tracing::info!("logs dir = {}", dir);
    });
}

static GLOBAL_UT_LOG_GUARD: Lazy<Mutex<Option<Vec<WorkerGuard>>>> = Lazy::new(|| Mutex::new(None));

/// Resolve the level filter from the options, `RUST_LOG`, or the default.
///
/// # Errors
/// Returns an error if the directives cannot be parsed.
pub fn parse_log_targets(
    level: Option<&str>,
) -> Result<filter::Targets, filter::ParseError> {
    let from_env = env::var(EnvFilter::DEFAULT_ENV).ok();
    level
        .or(from_env.as_deref())
        .unwrap_or(DEFAULT_LOG_TARGETS)
        .parse::<filter::Targets>()
}

fn fmt_layer<S>(format: LogFormat, writer: NonBlocking, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn rolling_writer(opts: &LoggingOptions, prefix: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let rolling_appender = RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        });
    let (writer, guard) = tracing_appender::non_blocking(rolling_appender);
    guards.push(guard);
    writer
}

/// Install the global subscriber. Only the first call has any effect.
///
/// Log files are named `{app_name}.*` and `{app_name}-err.*`. The returned
/// guards flush the non-blocking writers when dropped, so keep them for the
/// lifetime of the process.
///
/// # Panics
/// Panics if the log directory is unusable, the level directives are invalid
/// or another global subscriber is already installed.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            fmt_layer(opts.log_format, writer, std::io::stdout().is_terminal())
        });

        let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
            (None, None)
        } else {
            let writer = rolling_writer(opts, app_name, &mut guards);
            let err_writer = rolling_writer(opts, &format!("{app_name}-err"), &mut guards);
            (
                Some(fmt_layer(opts.log_format, writer, false)),
                Some(
                    fmt_layer(opts.log_format, err_writer, false)
                        .with_filter(filter::LevelFilter::ERROR),
                ),
            )
        };

        let filter = parse_log_targets(opts.level.as_deref()).expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_format_falls_back_to_default() {
        #[derive(Deserialize)]
        struct Wrapper {
            logging: LoggingOptions,
        }

        let parsed: Wrapper = serde_json::from_str(
            r#"{"logging": {"dir": "/var/log/kiln", "log_format": "", "max_log_files": 24}}"#,
        )
        .unwrap();
        assert_eq!(parsed.logging.log_format, LogFormat::Text);
        assert_eq!(parsed.logging.dir, "/var/log/kiln");
        assert_eq!(parsed.logging.max_log_files, 24);
        assert!(parsed.logging.append_stdout);

        let json: LoggingOptions = serde_json::from_str(r#"{"log_format": "json"}"#).unwrap();
        assert_eq!(json.log_format, LogFormat::Json);
        assert!(serde_json::from_str::<LoggingOptions>(r#"{"log_format": "xml"}"#).is_err());
    }

    #[test]
    fn builder_matches_defaults() {
        assert_eq!(LoggingOptions::builder().build(), LoggingOptions::default());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn explicit_level_wins_over_env() {
        let targets = parse_log_targets(Some("warn,kiln_common_jobs=debug")).unwrap();
        assert!(targets.would_enable("kiln_common_jobs::worker", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("hyper", &tracing::Level::INFO));
        assert!(parse_log_targets(Some("kiln=loud")).is_err());
    }
}
