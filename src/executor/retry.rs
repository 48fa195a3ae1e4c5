use std::time::Duration;

use crate::{CallflowError, Result};

/// Invokes `op` up to `retry_count` times (at least once), sleeping a fixed
/// `retry_delay` between attempts but not after the last one.
///
/// `op` receives the 1-based attempt number. When every attempt fails the
/// error of the last attempt is returned inside [`CallflowError::RetriesExhausted`].
pub async fn retry_with_delay<T, F, Fut>(
    mut op: F,
    retry_count: u32,
    retry_delay: Duration,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry_count.max(1);
    let mut attempt = 1u32;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => {
                return Err(CallflowError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                tracing::warn!("attempt {}/{} failed: {}. retrying in {}ms", attempt, attempts, err, retry_delay.as_millis());
                if !retry_delay.is_zero() {
                    tokio::time::sleep(retry_delay).await;
                }
                attempt += 1;
            }
        }
    }
}
