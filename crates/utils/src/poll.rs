//! Bounded-retry polling.
//!
//! Every "wait until ready" workflow in the workspace — instance state,
//! image availability, control-plane health, model readiness — loops through
//! [`wait_until`] with a [`PollPolicy`] bounding the wait.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval and iteration bound for a polling loop.
///
/// The total wait is bounded by `interval * max_iterations`. Policies are
/// stateless and shared across call sites as constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Number of predicate evaluations before giving up.
    pub max_iterations: u32,
}

impl PollPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(interval: Duration, max_iterations: u32) -> Self {
        Self {
            interval,
            max_iterations,
        }
    }

    /// Upper bound on the total wait this policy allows.
    #[must_use]
    pub fn bound(&self) -> Duration {
        self.interval * self.max_iterations
    }
}

/// Errors produced by [`wait_until`].
#[derive(Error, Debug)]
pub enum PollError {
    /// The predicate never succeeded within the policy's bound.
    #[error("condition not met after {0:?}")]
    Timeout(Duration),

    /// The wait was cancelled from the outside.
    #[error("wait cancelled")]
    Cancelled,
}

/// Poll `predicate` until it returns `true`, up to the policy's bound.
///
/// The predicate is evaluated exactly `max_iterations` times in the worst
/// case, with `interval` between attempts. A predicate that fails with a
/// transport error should return `false` — not-yet-ready and unreachable are
/// the same thing to the caller, which only sees the final timeout.
///
/// The cancellation token is observed between attempts, so a long wait dies
/// promptly when the caller gives up.
///
/// # Errors
/// Returns [`PollError::Timeout`] when the bound is exhausted and
/// [`PollError::Cancelled`] when the token fires first.
pub async fn wait_until<F, Fut>(
    policy: PollPolicy,
    token: &CancellationToken,
    mut predicate: F,
) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for attempt in 1..=policy.max_iterations {
        if token.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        if predicate().await {
            return Ok(());
        }

        debug!(attempt, max = policy.max_iterations, "Condition not met yet");

        tokio::select! {
            () = token.cancelled() => return Err(PollError::Cancelled),
            () = tokio::time::sleep(policy.interval) => {}
        }
    }

    Err(PollError::Timeout(policy.bound()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn times_out_after_exact_iteration_budget() {
        let policy = PollPolicy::new(Duration::from_secs(1), 3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let start = tokio::time::Instant::now();
        let result = wait_until(policy, &CancellationToken::new(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;

        assert!(matches!(result, Err(PollError::Timeout(d)) if d == Duration::from_secs(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Three failed attempts, one sleep after each.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_on_first_success() {
        let policy = PollPolicy::new(Duration::from_secs(1), 10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = wait_until(policy, &CancellationToken::new(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_cuts_the_wait_short() {
        let policy = PollPolicy::new(Duration::from_secs(60), 100);
        let token = CancellationToken::new();

        let waiter = {
            let token = token.clone();
            tokio::spawn(
                async move { wait_until(policy, &token, || async { false }).await },
            )
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PollError::Cancelled)));
    }

    #[test]
    fn bound_is_interval_times_iterations() {
        let policy = PollPolicy::new(Duration::from_secs(10), 30);
        assert_eq!(policy.bound(), Duration::from_secs(300));
    }
}
