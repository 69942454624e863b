//! Default deadlines and async timeout wrappers.

use crate::error::{RemotingError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for connection attempts
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default idle window after which a silent connection is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Period of the sweep that reclaims timed-out pending requests
pub const REAPER_PERIOD: Duration = Duration::from_secs(1);

/// Run a future against a deadline, mapping expiry to `RemotingError::Timeout`.
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemotingError::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_through_result() {
        let ok = with_timeout(async { Ok(7) }, Duration::from_secs(1)).await;
        assert!(matches!(ok, Ok(7)));
    }

    #[tokio::test]
    async fn with_timeout_maps_expiry() {
        let expired = with_timeout::<_, ()>(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(expired, Err(RemotingError::Timeout(_))));
    }
}
