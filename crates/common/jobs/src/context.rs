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

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable execution context handed to every job.
///
/// A context is done once its token is cancelled or its deadline has passed,
/// whichever comes first. Jobs are expected to poll [`is_cancelled`] or race
/// their work against [`cancelled`]; nothing forcibly stops a job that
/// ignores the context.
///
/// The same type bounds [`Dispatcher::stop`](crate::Dispatcher::stop): an
/// already expired context makes shutdown return immediately.
///
/// [`is_cancelled`]: JobContext::is_cancelled
/// [`cancelled`]: JobContext::cancelled
#[derive(Clone, Debug, Default)]
pub struct JobContext {
    cancel_token: CancellationToken,
    deadline:     Option<Instant>,
}

impl JobContext {
    /// A context that is never done unless cancelled explicitly.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A context driven by an existing token.
    #[must_use]
    pub const fn from_token(cancel_token: CancellationToken) -> Self {
        JobContext {
            cancel_token,
            deadline: None,
        }
    }

    /// Derive a child context that is additionally done after `timeout`.
    ///
    /// The child keeps the earlier of the parent's deadline and the new one,
    /// and is cancelled whenever the parent is.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < requested => current,
            _ => requested,
        };
        JobContext {
            cancel_token: self.cancel_token.child_token(),
            deadline:     Some(deadline),
        }
    }

    /// Derive a child context that is cancelled with the parent but can also
    /// be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        JobContext {
            cancel_token: self.cancel_token.child_token(),
            deadline:     self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) { self.cancel_token.cancel(); }

    pub const fn deadline(&self) -> Option<Instant> { self.deadline }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Check if cancellation has been requested or the deadline has passed.
    pub fn is_cancelled(&self) -> bool { self.cancel_token.is_cancelled() || self.is_expired() }

    /// Wait until the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel_token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel_token.cancelled().await,
        }
    }

    /// Get a child cancellation token for sub-tasks.
    pub fn child_token(&self) -> CancellationToken { self.cancel_token.child_token() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_marks_context_done() {
        let ctx = JobContext::new().with_timeout(Duration::from_millis(20));
        assert!(!ctx.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("deadline should fire");
        assert!(ctx.is_cancelled());
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_children() {
        let parent = JobContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        let grandchild = child.child();

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        grandchild.cancelled().await;
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent_alone() {
        let parent = JobContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn child_keeps_earlier_deadline() {
        let parent = JobContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let zero = JobContext::new().with_timeout(Duration::ZERO);
        assert!(zero.is_cancelled());
        assert_eq!(zero.remaining(), Some(Duration::ZERO));
    }
}
