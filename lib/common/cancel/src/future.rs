use std::future::Future;
use std::time::Duration;

use super::*;

/// Run `future` until it completes, the token is triggered, or `timeout` elapses.
///
/// Cancellation wins over the timeout when both are ready at the same time.
///
/// # Cancel safety
///
/// This function is cancel safe.
///
/// The provided future must be cancel safe. It is dropped on cancellation or timeout.
pub async fn timeout_on_token<Fut>(
    cancel: CancellationToken,
    timeout: Duration,
    future: Fut,
) -> Result<Fut::Output, Error>
where
    Fut: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = tokio::time::timeout(timeout, future) => {
            output.map_err(|_elapsed| Error::TimedOut(timeout))
        },
    }
}
