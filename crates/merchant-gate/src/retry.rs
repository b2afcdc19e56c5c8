//! Bounded retry for read-only calls.
//!
//! Transactions are never retried here: resubmitting an approval risks a double
//! submission, so [`crate::submit`] has its own recovery path instead.

use std::future::Future;
use std::time::Duration;

use crate::error::{GateError, WalletError};

/// Fixed-attempt, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy is
/// exhausted. Failures come back as [`GateError::ContractCommunicationFailure`].
pub async fn retry_read<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, GateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WalletError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    call = label,
                    attempt,
                    error = %e,
                    "transient RPC error, retrying"
                );
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(e) => {
                tracing::warn!(call = label, attempt, error = %e, "read call failed");
                return Err(GateError::from_read(label, &e));
            }
        }
    }
}
