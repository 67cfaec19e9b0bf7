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

//! `/api/v1/health` reporting the state of registered services.

use std::sync::Arc;

use axum::{Json, Router, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};

/// State of one service as shown in the health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[display("ok")]
    Ok,
    #[display("stopped")]
    Stopped,
    #[display("error")]
    Error,
}

/// Something the health endpoint can ask about its state.
pub trait HealthIndicator: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn status(&self) -> ServiceStatus;

    /// Extra detail shown when the service is not `ok`.
    fn error(&self) -> Option<String> { None }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceReport {
    pub name:   String,
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// `ok` when every service is ok, `degraded` otherwise.
    pub status:    String,
    pub timestamp: String,
    pub version:   String,
    pub services:  Vec<ServiceReport>,
}

impl HealthResponse {
    #[must_use]
    pub fn collect(indicators: &[Arc<dyn HealthIndicator>]) -> Self {
        let services: Vec<ServiceReport> = indicators
            .iter()
            .map(|indicator| ServiceReport {
                name:   indicator.name().to_string(),
                status: indicator.status(),
                error:  indicator.error(),
            })
            .collect();
        let healthy = services.iter().all(|s| s.status == ServiceStatus::Ok);

        HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services,
        }
    }

    pub fn is_healthy(&self) -> bool { self.status == "ok" }
}

async fn health_handler(indicators: Arc<[Arc<dyn HealthIndicator>]>) -> (StatusCode, Json<HealthResponse>) {
    let report = HealthResponse::collect(&indicators);
    let code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Route handler adding `/api/v1/health` for the given services.
///
/// Answers 200 while every service reports `ok` and 503 with status
/// `degraded` otherwise.
pub fn health_routes(
    indicators: Vec<Arc<dyn HealthIndicator>>,
) -> impl Fn(Router) -> Router + Clone + Send + Sync + 'static {
    let indicators: Arc<[Arc<dyn HealthIndicator>]> = indicators.into();
    move |router: Router| {
        let indicators = Arc::clone(&indicators);
        router.route(
            "/api/v1/health",
            get(move || health_handler(Arc::clone(&indicators))),
        )
    }
}
