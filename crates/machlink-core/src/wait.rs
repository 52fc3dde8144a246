//! Wait-for-predicate helper used by control operations

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Sample every `interval` until `predicate` holds or `limit` elapses.
///
/// Absent samples never satisfy the predicate. Returns the first
/// satisfying sample, or `None` on timeout.
pub async fn wait_until<T, S, Fut, P>(
    mut sample: S,
    predicate: P,
    interval: Duration,
    limit: Duration,
) -> Option<T>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
    P: Fn(&T) -> bool,
{
    let poll = async {
        loop {
            if let Some(value) = sample().await {
                if predicate(&value) {
                    return value;
                }
            }
            sleep(interval).await;
        }
    };
    timeout(limit, poll).await.ok()
}

/// [`wait_until`] over a fallible sample.
///
/// The first error ends the wait and is returned as is; `Ok(None)` means
/// the limit elapsed without a satisfying sample.
pub async fn try_wait_until<T, E, S, Fut, P>(
    mut sample: S,
    predicate: P,
    interval: Duration,
    limit: Duration,
) -> Result<Option<T>, E>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let poll = async {
        loop {
            let value = sample().await?;
            if predicate(&value) {
                return Ok(value);
            }
            sleep(interval).await;
        }
    };
    match timeout(limit, poll).await {
        Ok(Ok(value)) => Ok(Some(value)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}
