//! Per-probe cancellable deadlines

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Wall-clock bound for one probe.
///
/// A deadline fires either when its instant passes or when its token (or any
/// parent token) is cancelled. Every probe owns its own deadline, so probes
/// running side by side are bounded independently.
#[derive(Debug, Clone)]
pub struct ProbeDeadline {
    token: CancellationToken,
    expires_at: Instant,
    budget: Duration,
}

impl ProbeDeadline {
    pub fn new(budget: Duration) -> Self {
        Self::child_of(&CancellationToken::new(), budget)
    }

    /// Deadline that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken, budget: Duration) -> Self {
        Self {
            token: parent.child_token(),
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// Deadline that never expires on its own.
    pub fn unbounded() -> Self {
        // About 30 years; tokio rejects Instant overflow.
        Self::new(Duration::from_secs(60 * 60 * 24 * 365 * 30))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.expires_at
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the deadline passes or the token is cancelled.
    pub async fn expired(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.expires_at) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expires_after_budget() {
        let deadline = ProbeDeadline::new(Duration::from_millis(20));
        assert!(!deadline.is_expired());
        deadline.expired().await;
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = CancellationToken::new();
        let deadline = ProbeDeadline::child_of(&parent, Duration::from_secs(60));
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), deadline.expired())
            .await
            .unwrap();
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_cancelling_child_leaves_parent_running() {
        let parent = CancellationToken::new();
        let first = ProbeDeadline::child_of(&parent, Duration::from_secs(60));
        let second = ProbeDeadline::child_of(&parent, Duration::from_secs(60));
        first.cancel();
        assert!(first.is_expired());
        assert!(!second.is_expired());
        assert!(!parent.is_cancelled());
    }
}
