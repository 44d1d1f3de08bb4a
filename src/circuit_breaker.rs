use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::futures::CircuitBreaker;
use failsafe::{Config, Error, StateMachine};
use std::future::Future;
use std::time::Duration;

use crate::errors::AdapterError;
use crate::models::DataSource;

/// Breaker guarding one external source.
pub type SourceCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for a network source so a dead provider fails fast
/// instead of eating its whole timeout on every investigation.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast with `AdapterError::CircuitOpen`.
/// - **HALF_OPEN**: Testing if the provider recovered.
///
/// # Returns
///
/// * `SourceCircuitBreaker` - Cloneable handle; clones share state.
pub fn create_source_circuit_breaker() -> SourceCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Run a provider call through its breaker.
///
/// # Arguments
///
/// * `breaker` - The source's breaker.
/// * `source` - Used for logging only.
/// * `call` - The provider request.
pub async fn call_guarded<T, F>(
    breaker: &SourceCircuitBreaker,
    source: DataSource,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match breaker.call(call).await {
        Ok(value) => Ok(value),
        Err(Error::Inner(e)) => Err(e),
        Err(Error::Rejected) => {
            tracing::warn!("⚠️ Circuit open for {}, skipping request", source);
            Err(AdapterError::CircuitOpen)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_source_circuit_breaker();

        // Simulate 5 consecutive failures
        for _ in 0..5 {
            let result: Result<(), AdapterError> = call_guarded(&cb, DataSource::Telnyx, async {
                Err(AdapterError::Http("connection refused".to_string()))
            })
            .await;
            assert!(matches!(result, Err(AdapterError::Http(_))));
        }

        // Next call should be rejected without running
        let result = call_guarded(&cb, DataSource::Telnyx, async { Ok::<_, AdapterError>(1) }).await;
        assert!(matches!(result, Err(AdapterError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_source_circuit_breaker();

        let result = call_guarded(&cb, DataSource::Numverify, async { Ok::<_, AdapterError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let cb = create_source_circuit_breaker();
        let clone = cb.clone();
        for _ in 0..5 {
            let _ = call_guarded(&clone, DataSource::Veriphone, async {
                Err::<(), _>(AdapterError::Status {
                    status: 503,
                    body: String::new(),
                })
            })
            .await;
        }
        let result = call_guarded(&cb, DataSource::Veriphone, async { Ok::<_, AdapterError>(()) }).await;
        assert!(matches!(result, Err(AdapterError::CircuitOpen)));
    }
}
