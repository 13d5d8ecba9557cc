//! Cancellable polling loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::retry::RetryPolicy;

/// What the loop should do after a successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    /// Poll again after the given delay.
    Continue(Duration),
    /// The remote resource is gone; end the loop.
    Stop,
}

/// Why a poll loop ended.
#[derive(Debug, Clone)]
pub enum PollExit {
    /// Shutdown was requested.
    Cancelled,
    /// The poller reported the resource is gone.
    Finished,
    /// A permanent failure, or the retry budget was exhausted.
    Failed(TransportError),
}

/// One page fetch of a polled resource.
#[async_trait]
pub trait Poller: Send + 'static {
    /// Fetches and processes one page.
    async fn poll(&mut self) -> TransportResult<PollControl>;
}

/// Drives `poller` until shutdown, completion, or a fatal error.
///
/// Transient failures back off according to `retry`; the budget is reset
/// after every successful poll.
pub async fn run_poll_loop<P: Poller>(
    mut poller: P,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) -> PollExit {
    let mut backoff = retry.backoff();

    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return PollExit::Cancelled,
            result = poller.poll() => result,
        };

        let delay = match result {
            Ok(PollControl::Continue(delay)) => {
                backoff.reset();
                delay
            }
            Ok(PollControl::Stop) => {
                info!("Polled resource finished");
                return PollExit::Finished;
            }
            Err(e) if e.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    warn!(error = %e, delay = ?delay, "Poll failed, backing off");
                    delay
                }
                None => {
                    error!(error = %e, "Poll failed, retry budget exhausted");
                    return PollExit::Failed(e);
                }
            },
            Err(e) => {
                error!(error = %e, "Poll failed permanently");
                return PollExit::Failed(e);
            }
        };

        debug!(delay = ?delay, "Next poll scheduled");
        tokio::select! {
            _ = shutdown.cancelled() => return PollExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
