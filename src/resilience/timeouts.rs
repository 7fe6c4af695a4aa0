//! Deadline enforcement for device calls.
//!
//! Every device round trip runs under a deadline. An elapsed deadline drops
//! the inner future and surfaces as [`GatewayError::Timeout`], which the
//! breaker counts as a failure like any other device error.

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Run `future` with a deadline of `after`.
pub async fn with_timeout<T, Fut>(after: Duration, operation: &str, future: Fut) -> GatewayResult<T>
where
    Fut: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation = %operation, timeout_ms = after.as_millis() as u64, "Device operation timed out");
            Err(GatewayError::Timeout {
                operation: operation.to_string(),
                after,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_maps_to_timeout() {
        let result: GatewayResult<()> = with_timeout(Duration::from_millis(100), "read speed", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result,
            Err(GatewayError::Timeout {
                operation: "read speed".into(),
                after: Duration::from_millis(100),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_result_passes_through() {
        let result = with_timeout(Duration::from_millis(100), "read", async { Ok(7u8) }).await;
        assert_eq!(result, Ok(7));
    }
}
