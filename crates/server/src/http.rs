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

use std::net::SocketAddr;

use axum::{Router, extract::DefaultBodyLimit, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{BindSnafu, ParseAddressSnafu, Result, ServiceHandler};

/// Default maximum HTTP request body size (100 MiB)
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RestServerConfig {
    /// The address to bind the REST server
    #[default = "127.0.0.1:8080"]
    #[builder(default = "127.0.0.1:8080".to_string(), into)]
    pub bind_address:  String,
    /// Maximum HTTP request body size in bytes
    #[default(DEFAULT_MAX_HTTP_BODY_SIZE)]
    #[builder(default = DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size: usize,
    /// Whether to enable permissive CORS
    #[default = true]
    #[builder(default = true)]
    pub enable_cors:   bool,
}

impl RestServerConfig {
    /// Replace the port of `bind_address`, keeping its host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .bind_address
            .rsplit_once(':')
            .map_or(self.bind_address.as_str(), |(host, _)| host);
        self.bind_address = format!("{host}:{port}");
    }
}

/// Starts the REST server and returns a handle for managing its lifecycle.
///
/// Route handlers are applied in order, then the body limit and CORS layers
/// wrap every route. The listener is bound before this returns, so bind
/// failures are reported here rather than from the serving task.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use kiln_server::http::{RestServerConfig, start_rest_server};
///
/// fn my_routes(router: Router) -> Router {
///     router.route("/api/v1/hello", get(|| async { "Hello, World!" }))
/// }
///
/// # async fn run() -> kiln_server::Result<()> {
/// let mut handle = start_rest_server(RestServerConfig::default(), vec![my_routes]).await?;
/// handle.wait_for_start().await?;
/// handle.shutdown();
/// handle.wait_for_stop().await;
/// # Ok(())
/// # }
/// ```
pub async fn start_rest_server<F>(
    config: RestServerConfig,
    route_handlers: Vec<F>,
) -> Result<ServiceHandler>
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    let bind_addr = config
        .bind_address
        .parse::<SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;

    let mut router = Router::new().route("/health", get(health_check));
    for handler in &route_handlers {
        router = handler(router);
    }
    info!(handlers = route_handlers.len(), "Registered REST route handlers");

    router = router.layer(DefaultBodyLimit::max(config.max_body_size));
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(BindSnafu { addr: bind_addr })?;
    let local_addr = listener.local_addr().context(BindSnafu { addr: bind_addr })?;

    let cancellation_token = CancellationToken::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let shutdown = cancellation_token.clone();
    let join_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = started_tx.send(());
                info!(%local_addr, "REST server started");
                shutdown.cancelled().await;
                info!(%local_addr, "REST server received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => info!(%local_addr, "REST server stopped"),
            Err(e) => warn!(%local_addr, error = %e, "REST server exited with error"),
        }
    });

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        started_rx: Some(started_rx),
        local_addr,
    })
}

/// Liveness probe for the REST server
async fn health_check() -> impl IntoResponse { (StatusCode::OK, "OK") }
