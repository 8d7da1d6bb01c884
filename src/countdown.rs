//! Single-shot countdown task for one environment. The timer races the
//! cancellation token; the race is the only suspension point and the
//! cancellation branch wins deterministically when both are ready.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Expired,
    Cancelled,
    InvalidTtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Removal,
    /// Reserved; armed notification countdowns carry no callback yet.
    Notification,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Removal => write!(f, "removal"),
            Scenario::Notification => write!(f, "notification"),
        }
    }
}

/// Run one countdown to completion. A non-positive TTL resolves to
/// [`CountdownOutcome::InvalidTtl`] without starting a timer. On natural
/// expiry of a [`Scenario::Removal`] countdown the callback is awaited with
/// the environment's member namespace names; a cancelled countdown never
/// invokes it.
pub async fn run_countdown<F, Fut>(
    env_name: &str,
    namespaces: Vec<String>,
    ttl_secs: i64,
    scenario: Scenario,
    token: CancellationToken,
    on_expiry: F,
) -> CountdownOutcome
where
    F: FnOnce(Vec<String>) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    if ttl_secs <= 0 {
        debug!(env = %env_name, %scenario, "countdown armed with spent TTL");
        return CountdownOutcome::InvalidTtl;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(env = %env_name, %scenario, "countdown cancelled");
            CountdownOutcome::Cancelled
        }
        _ = tokio::time::sleep(Duration::from_secs(ttl_secs as u64)) => {
            debug!(env = %env_name, ttl_secs, %scenario, "countdown expired");
            if scenario == Scenario::Removal {
                on_expiry(namespaces).await;
            }
            CountdownOutcome::Expired
        }
    }
}
