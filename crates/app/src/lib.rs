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

//! Application wiring: configuration, logging, the job dispatcher and the
//! REST server, tied together with signal-driven graceful shutdown.

pub mod config;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

pub use config::{AppConfig, ConfigError, JobsConfig, ServerConfig};
use kiln_common_jobs::{Dispatcher, JobContext};
use kiln_common_telemetry as telemetry;
use kiln_server::{
    health::{HealthIndicator, ServiceStatus, health_routes},
    http::start_rest_server,
};
use snafu::{ResultExt, Whatever};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reports the job dispatcher in `/api/v1/health`.
struct JobsHealth {
    dispatcher: Dispatcher,
}

impl HealthIndicator for JobsHealth {
    fn name(&self) -> &str { "jobs" }

    fn status(&self) -> ServiceStatus {
        if self.dispatcher.is_running() {
            ServiceStatus::Ok
        } else {
            ServiceStatus::Stopped
        }
    }
}

/// Represents the main application with lifecycle management
pub struct App {
    config:     AppConfig,
    dispatcher: Dispatcher,
    running:    Arc<AtomicBool>,
}

impl AppConfig {
    /// Build the application. Nothing is started yet.
    #[must_use]
    pub fn open(self) -> App {
        let dispatcher = Dispatcher::with_config(self.jobs.dispatcher_config());
        App {
            config: self,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    running:     Arc<AtomicBool>,
    stopped:     CancellationToken,
    dispatcher:  Dispatcher,
    local_addr:  SocketAddr,
}

impl AppHandle {
    /// Trigger graceful shutdown. Returns immediately; use
    /// [`wait_for_shutdown`](Self::wait_for_shutdown) to wait for it.
    pub fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Wait until the REST server and the dispatcher have been stopped.
    pub async fn wait_for_shutdown(&self) { self.stopped.cancelled().await; }

    /// Dispatcher for submitting jobs or attaching scheduled jobs.
    pub const fn dispatcher(&self) -> &Dispatcher { &self.dispatcher }

    /// Address the REST server listens on.
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}

impl App {
    pub const fn config(&self) -> &AppConfig { &self.config }

    pub const fn dispatcher(&self) -> &Dispatcher { &self.dispatcher }

    /// Start the dispatcher (when enabled) and the REST server, and spawn the
    /// task that tears both down on Ctrl-C, SIGTERM or
    /// [`AppHandle::shutdown`].
    pub async fn start(self) -> Result<AppHandle, Whatever> {
        info!(
            environment = self.config.server.environment,
            "Starting kiln application"
        );

        let jobs_enabled = self.config.jobs.enabled;
        let mut indicators: Vec<Arc<dyn HealthIndicator>> = Vec::new();
        if jobs_enabled {
            self.dispatcher.start();
            indicators.push(Arc::new(JobsHealth {
                dispatcher: self.dispatcher.clone(),
            }));
        } else {
            info!("Background jobs are disabled");
        }

        let mut http_handle =
            start_rest_server(self.config.server.http.clone(), vec![health_routes(indicators)])
                .await
                .whatever_context("Failed to start REST server")?;
        http_handle
            .wait_for_start()
            .await
            .whatever_context("REST server failed to start")?;
        let local_addr = http_handle.local_addr();

        self.running.store(true, Ordering::SeqCst);
        info!(%local_addr, "Application started successfully");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let stopped = CancellationToken::new();
        let handle = AppHandle {
            shutdown_tx: Some(shutdown_tx),
            running: Arc::clone(&self.running),
            stopped: stopped.clone(),
            dispatcher: self.dispatcher.clone(),
            local_addr,
        };

        let running = Arc::clone(&self.running);
        let dispatcher = self.dispatcher;
        let shutdown_timeout = self.config.server.shutdown_timeout;
        tokio::spawn(async move {
            shutdown_signal(shutdown_rx).await;
            running.store(false, Ordering::SeqCst);

            let deadline = JobContext::new().with_timeout(shutdown_timeout);
            info!(timeout = ?shutdown_timeout, "Shutting down servers");
            http_handle.shutdown();
            tokio::select! {
                () = http_handle.wait_for_stop() => {}
                () = deadline.cancelled() => warn!("REST server did not stop within the shutdown timeout"),
            }

            if jobs_enabled {
                dispatcher.stop(&deadline).await;
            }

            info!("Application shutdown complete");
            stopped.cancel();
        });

        Ok(handle)
    }

    /// Initialize logging and the panic hook, then run until shut down.
    pub async fn run(self) -> Result<(), Whatever> {
        let _guards = telemetry::init_global_logging("kiln", &self.config.logging);
        telemetry::set_panic_hook();

        let handle = self.start().await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        _ = shutdown_rx => { info!("Received shutdown signal"); },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = AppConfig::default().open();
        assert!(!app.running.load(Ordering::SeqCst));
        assert!(!app.dispatcher().is_running());
        assert_eq!(app.dispatcher().worker_count(), 5);
        assert_eq!(app.config().server.environment, "development");
    }
}
