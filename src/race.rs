//! First-success-or-wait-for-all combinator
//!
//! Runs a batch of verification attempts as independent tasks and reduces
//! their votes into one result:
//!
//! - the first attempt that votes `Some(value)` wins immediately;
//! - `None` is returned only once every attempt has voted `None`, timed out,
//!   panicked or been cancelled.
//!
//! All tasks live in a [`JoinSet`] owned by the call. Returning drops the set,
//! which aborts whatever is still running, so a late attempt can never outlive
//! the decision. Dropping the returned future (caller cancellation) does the
//! same.

use std::future::Future;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

/// Race `attempts` until one yields a value or all have failed.
///
/// Each attempt is bounded by `deadline`; an attempt still running at the
/// deadline votes `None`.
pub async fn first_success<T, F>(attempts: Vec<F>, deadline: Instant) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = Option<T>> + Send + 'static,
{
    if attempts.is_empty() {
        return None;
    }

    let mut tasks = JoinSet::new();
    for attempt in attempts {
        tasks.spawn(async move {
            match tokio::time::timeout_at(deadline, attempt).await {
                Ok(vote) => vote,
                Err(_) => {
                    debug!("verification attempt exceeded its deadline");
                    None
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(value)) => {
                if !tasks.is_empty() {
                    debug!(outstanding = tasks.len(), "cancelling remaining attempts");
                }
                tasks.abort_all();
                return Some(value);
            }
            Ok(None) => {}
            Err(e) if e.is_panic() => {
                error!("verification attempt panicked, counting it as invalid");
            }
            Err(_) => {}
        }
    }

    None
}
