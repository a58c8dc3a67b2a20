//! Time-boxed, cancellable outbound calls.
//!
//! Every LLM and tool invocation in the pipeline goes through [`bounded`], so a
//! hung provider or a cancelled request surfaces as a typed error instead of a
//! stalled task.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `fut` with a deadline, aborting early if `cancel` fires.
///
/// Cancellation wins over a simultaneously ready result.
pub async fn bounded<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(label.to_string()));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(label.to_string())),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout(format!("{} exceeded {}ms", label, timeout.as_millis()))),
        },
    }
}
