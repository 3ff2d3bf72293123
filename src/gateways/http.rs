use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use super::GatewayError;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// reqwest client behind a circuit breaker. One per gateway.
pub struct GuardedClient {
    client: Client,
    circuit_breaker: Breaker,
}

impl GuardedClient {
    pub fn new() -> Self {
        Self::with_circuit_breaker_config(5, Duration::from_secs(60))
    }

    pub fn with_circuit_breaker_config(failure_threshold: u32, reset_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::exponential(Duration::from_secs(10), reset_timeout);
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            circuit_breaker,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Runs `request` through the breaker. An open breaker short-circuits with
    /// `GatewayError::CircuitBreakerOpen`.
    pub async fn call<T, F>(&self, request: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match self.circuit_breaker.call(request).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

impl Clone for GuardedClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

impl Default for GuardedClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a JSON body, turning non-2xx statuses and undecodable bodies into gateway errors.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Rejected(format!("HTTP {status}: {body}")));
    }

    serde_json::from_str(&body)
        .map_err(|e| GatewayError::UnexpectedPayload(format!("{e}: {body}")))
}
