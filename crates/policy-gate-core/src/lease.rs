//! Exclusive lease around work on a single merge request.
//!
//! Concurrent evaluations of the same change would otherwise race on the
//! bot comment. The lease retries a bounded number of times with a fixed
//! sleep, then gives up with [`PolicyGateError::LockNotAcquired`].

use std::future::Future;

use policy_gate_state::{EvaluationLock, LockToken};

use crate::config::LockConfig;
use crate::domain::{PolicyGateError, Result};
use crate::metrics::METRICS;
use crate::obs;

async fn acquire<L>(lock: &L, key: &str, config: &LockConfig) -> Result<LockToken>
where
    L: EvaluationLock + ?Sized,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Some(token) = lock.try_acquire(key, config.ttl()).await? {
            return Ok(token);
        }
        METRICS.inc_lock_contentions();
        obs::emit_lock_contended(key, attempt);
        if attempt < max_attempts {
            tokio::time::sleep(config.retry_sleep()).await;
        }
    }

    Err(PolicyGateError::LockNotAcquired {
        key: key.to_string(),
        attempts: max_attempts,
    })
}

/// Run `f` while holding the lease for `key`.
///
/// The lease is released whether `f` succeeds or fails. If the holder dies
/// before releasing, the lease expires after `config.ttl_ms`.
pub async fn with_exclusive_lease<L, F, Fut, T>(
    lock: &L,
    key: &str,
    config: &LockConfig,
    f: F,
) -> Result<T>
where
    L: EvaluationLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let token = acquire(lock, key, config).await?;
    let result = f().await;

    if let Err(err) = lock.release(&token).await {
        // Expired while we held it; the work itself already finished.
        tracing::warn!(workflow = obs::WORKFLOW, key = %key, error = %err, "lease release failed");
    }

    result
}
