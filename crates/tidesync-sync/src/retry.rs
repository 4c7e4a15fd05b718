//! Transient error retry
//!
//! Remote primitive calls are retried with exponential backoff when the
//! error is transient: 1s, 2s, 4s, 8s, 16s (max 5 retries).

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use tidesync_core::ports::TransientError;

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Whether an error is worth retrying
///
/// Only typed causes count: a [`TransientError`] raised by a remote adapter
/// or an I/O error of a connection or timeout kind somewhere in the chain.
/// Context messages are never inspected, since they carry user paths.
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.is::<TransientError>() {
            return true;
        }
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::Interrupted
            )
        })
    })
}

/// Runs `f` until it succeeds, fails with a non-transient error or the
/// retries are exhausted
pub async fn with_retry<F, Fut, T>(operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < MAX_RETRIES && is_transient_error(&err) => {
                let delay = BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
