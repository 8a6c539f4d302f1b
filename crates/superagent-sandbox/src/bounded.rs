//! Deadline and cancellation for in-process operations.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Interrupted;

/// Drive `future` to completion unless `deadline` passes or `cancel` fires
/// first. The future is dropped on interruption.
pub async fn bounded<F>(
    future: F,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        output = tokio::time::timeout(deadline, future) => {
            output.map_err(|_| Interrupted::Timeout(deadline))
        }
    }
}
