//! Retry policy for commands crossing a flaky link.

use std::future::Future;

use tracing::{debug, error};

use crate::error::Error;

/// Runs `op` until it succeeds, fails with a non-retryable error, or has
/// been retried `retries` times. The closure receives the attempt index,
/// starting at zero.
pub(crate) async fn with_retries<T, F, Fut>(retries: u32, mut op: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(Error::DeviceNotFound(address)) => {
                error!(%address, "device not found, giving up");
                return Err(Error::DeviceNotFound(address));
            }
            Err(Error::CharacteristicMissing(uuid)) if attempt < retries => {
                debug!(attempt, %uuid, "characteristic missing, retrying after cache clear");
            }
            Err(err) if err.is_retryable() && attempt < retries => {
                debug!(attempt, error = %err, "command failed, retrying");
            }
            Err(err) => return Err(err),
        }
        attempt += 1;
    }
}
