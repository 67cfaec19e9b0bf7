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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kiln_app::{
    App, AppConfig,
    config::{DEFAULT_CONFIG_DIR, DEFAULT_ENVIRONMENT},
};
use kiln_common_runtime::{Runtime, RuntimeOptions};
use snafu::{ResultExt, Whatever};

#[derive(Debug, Parser)]
#[clap(
name = "kiln",
about = "kiln: HTTP service with an in-process background job dispatcher",
author = env!("CARGO_PKG_AUTHORS"),
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Config(ConfigArgs),
}

/// Where to read configuration from.
#[derive(Debug, Clone, Args)]
struct ConfigSource {
    /// Directory holding `config.toml` and `<env>.toml`
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Environment name selecting the overlay file
    #[arg(long = "env", env = "ENVIRONMENT", default_value = DEFAULT_ENVIRONMENT)]
    environment: String,
}

impl ConfigSource {
    fn load(&self) -> Result<AppConfig, Whatever> {
        AppConfig::load(&self.config_dir, &self.environment).with_whatever_context(|_| {
            format!(
                "Failed to load configuration from {}",
                self.config_dir.display()
            )
        })
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the kiln server.
Examples:

kiln server
kiln server --config-dir /etc/kiln --env production

")]
struct ServerArgs {
    #[command(flatten)]
    source: ConfigSource,
}

impl ServerArgs {
    fn run(&self) -> Result<(), Whatever> {
        let config = self.source.load()?;
        let runtime = RuntimeOptions::builder()
            .thread_name("kiln-main".to_string())
            .build()
            .create()
            .whatever_context("Failed to build runtime")?;
        let app = open_on(&runtime, config);
        runtime.block_on(app.run())
    }
}

/// Build the app inside `runtime` so the dispatcher spawns its workers there.
fn open_on(runtime: &Runtime, config: AppConfig) -> App {
    let _entered = runtime.enter();
    config.open()
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Prints the effective configuration as TOML.
Examples:

kiln config
JOB_WORKERS=10 kiln config --env production

")]
struct ConfigArgs {
    #[command(flatten)]
    source: ConfigSource,
}

impl ConfigArgs {
    #[allow(clippy::print_stdout)]
    fn run(&self) -> Result<(), Whatever> {
        let rendered = self
            .source
            .load()?
            .to_toml_string()
            .whatever_context("Failed to render configuration")?;
        println!("{rendered}");
        Ok(())
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run(),
        Commands::Config(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use clap::CommandFactory;
    use kiln_common_jobs::{FnJob, JobContext};
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn cli_is_well_formed() { Cli::command().debug_assert(); }

    #[test]
    fn server_args_parse() {
        let cli = Cli::parse_from(["kiln", "server", "--config-dir", "/etc/kiln", "--env", "production"]);
        let Commands::Server(args) = cli.commands else {
            panic!("expected server command");
        };
        assert_eq!(args.source.config_dir, PathBuf::from("/etc/kiln"));
        assert_eq!(args.source.environment, "production");
    }

    #[test]
    fn config_args_default_dir() {
        let cli = Cli::parse_from(["kiln", "config"]);
        let Commands::Config(args) = cli.commands else {
            panic!("expected config command");
        };
        assert_eq!(args.source.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn dispatcher_runs_on_the_server_runtime() {
        let runtime = RuntimeOptions::builder()
            .thread_name("kiln-cmd-test".to_string())
            .worker_threads(1)
            .build()
            .create()
            .unwrap();
        let mut config = AppConfig::default();
        config.jobs.workers = 1;
        let app = open_on(&runtime, config);

        let thread = runtime.block_on(async {
            let dispatcher = app.dispatcher();
            dispatcher.start();

            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            dispatcher
                .dispatch_job(FnJob::new("cmd-thread-name", move |_ctx| {
                    let tx = tx.lock().unwrap().take();
                    async move {
                        if let Some(tx) = tx {
                            let _ = tx.send(std::thread::current().name().map(str::to_owned));
                        }
                        Ok(())
                    }
                }))
                .await;
            let thread = rx.await.unwrap();
            dispatcher.stop(&JobContext::new()).await;
            thread
        });

        let thread = thread.unwrap_or_default();
        assert!(thread.starts_with("kiln-cmd-test-"), "job ran on {thread}");
    }
}
