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

//! HTTP surface for kiln services.

pub mod health;
pub mod http;

use snafu::Snafu;
use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddress {
        addr:   String,
        source: std::net::AddrParseError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to bind {addr}"))]
    Bind {
        addr:   std::net::SocketAddr,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Server start signal already consumed or server exited before starting"))]
    StartSignal {
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Handle for managing a running service.
///
/// Lets the owner wait for the listener to accept connections, signal a
/// graceful shutdown and wait for the serving task to finish.
pub struct ServiceHandler {
    join_handle:        JoinHandle<()>,
    cancellation_token: CancellationToken,
    started_rx:         Option<Receiver<()>>,
    local_addr:         std::net::SocketAddr,
}

impl ServiceHandler {
    /// Waits for the server to start accepting connections.
    ///
    /// Fails if called twice or if the server task ended before starting.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        let Some(started_rx) = self.started_rx.take() else {
            return StartSignalSnafu.fail();
        };
        started_rx.await.map_err(|_| StartSignalSnafu.build())
    }

    /// Waits for the serving task to finish. Call after [`shutdown`].
    ///
    /// [`shutdown`]: ServiceHandler::shutdown
    pub async fn wait_for_stop(self) {
        if let Err(e) = self.join_handle.await {
            tracing::error!(error = %e, "Server task ended abnormally");
        }
    }

    /// Signals graceful shutdown without waiting for it.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    pub fn is_finished(&self) -> bool { self.join_handle.is_finished() }

    /// Address the listener is bound to. Useful when binding port 0.
    pub const fn local_addr(&self) -> std::net::SocketAddr { self.local_addr }
}
