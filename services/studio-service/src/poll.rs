use std::{future::Future, time::Duration};
use tokio::time::sleep;

/// Fixed-interval polling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// What a single check observed on the remote job.
#[derive(Debug, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    Failed(String),
    Pending,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The remote job reported a terminal failure.
    Remote(String),
    /// No terminal state within the attempt limit.
    Exhausted { attempts: u32 },
    /// The check itself failed (transport, parse, HTTP status).
    Fetch(E),
}

/// Sleeps one interval before each check and stops at the first terminal
/// status. A check error aborts immediately; nothing is retried on error.
pub async fn poll_until_terminal<F, Fut, T, E>(
    policy: PollPolicy,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        sleep(policy.interval).await;
        match check(attempt).await.map_err(PollError::Fetch)? {
            PollStatus::Ready(value) => return Ok(value),
            PollStatus::Failed(message) => return Err(PollError::Remote(message)),
            PollStatus::Pending => {
                tracing::debug!(attempt, max_attempts = policy.max_attempts, "remote job pending");
            }
        }
    }
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}
