//! Retry with exponential backoff behind a circuit breaker.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::now_ms;
use comanda_engine::{Admission, CircuitBreaker, CircuitStatus, RetryPolicy};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Runs network operations under the retry policy and the circuit breaker.
///
/// Shared through `Arc`; the breaker lock is never held across an await.
#[derive(Debug)]
pub struct RetryService {
    policy: RetryPolicy,
    circuit: Mutex<CircuitBreaker>,
}

impl RetryService {
    pub fn new(policy: RetryPolicy, circuit: CircuitBreaker) -> Self {
        Self {
            policy,
            circuit: Mutex::new(circuit),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.retry.clone(),
            CircuitBreaker::new(
                config.circuit_threshold,
                config.circuit_reset.as_millis() as u64,
            ),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn circuit(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` with retries.
    ///
    /// Every attempt must be admitted by the breaker. Retryable failures
    /// back off and try again until the attempt budget is spent, which then
    /// counts as one circuit failure. Permanent 5xx failures are charged too.
    /// Success closes the breaker; other answers leave it untouched unless
    /// they settle a half-open probe.
    ///
    /// A probe dropped before it settles is charged as a failure.
    pub async fn run<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut probe: Option<ProbeGuard<'_>> = None;

        loop {
            attempt += 1;

            if probe.is_none() {
                let admission = self.circuit().admit(now_ms());
                match admission {
                    Admission::Allowed => {}
                    Admission::Probe => {
                        tracing::info!(context, "Circuit half-open, sending probe");
                        probe = Some(ProbeGuard::arm(self, context));
                    }
                    Admission::Rejected { retry_in_ms } => {
                        tracing::warn!(context, retry_in_ms, "Circuit open, rejecting call");
                        return Err(ClientError::CircuitOpen { retry_in_ms });
                    }
                }
            }

            match op().await {
                Ok(value) => {
                    if let Some(guard) = probe.take() {
                        guard.disarm();
                    }
                    self.circuit().record_success();
                    if attempt > 1 {
                        tracing::info!(context, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if self.is_retryable(&err) && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        context,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let probing = match probe.take() {
                        Some(guard) => {
                            guard.disarm();
                            true
                        }
                        None => false,
                    };
                    if err.charges_circuit() || self.is_retryable(&err) {
                        self.record_failure(context, attempt, &err);
                    } else if probing {
                        // The server answered, so it is reachable again
                        self.circuit().record_success();
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Whether `err` is worth another attempt under the configured policy.
    fn is_retryable(&self, err: &ClientError) -> bool {
        match err {
            ClientError::Network(_) => true,
            ClientError::Transient { status, .. } | ClientError::Http { status, .. } => {
                self.policy.is_retryable_status(*status)
            }
            _ => false,
        }
    }

    /// Run `op` exactly once, outside the breaker. For operations that must
    /// never be replayed automatically.
    pub async fn run_once<T, F, Fut>(&self, context: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = op().await;
        if let Err(err) = &result {
            tracing::error!(context, error = %err, status = ?err.status(), "Critical operation failed");
        }
        result
    }

    fn record_failure(&self, context: &str, attempts: u32, err: &ClientError) {
        let mut circuit = self.circuit();
        circuit.record_failure(now_ms());
        let status = circuit.status();
        drop(circuit);

        if status.state == comanda_engine::CircuitState::Open {
            tracing::error!(
                context,
                attempts,
                failure_count = status.failure_count,
                error = %err,
                "Circuit opened"
            );
        } else {
            tracing::warn!(
                context,
                attempts,
                failure_count = status.failure_count,
                error = %err,
                "Operation failed"
            );
        }
    }

    pub fn circuit_status(&self) -> CircuitStatus {
        self.circuit().status()
    }

    pub fn reset_circuit(&self) {
        self.circuit().reset();
        tracing::info!("Circuit manually reset");
    }
}

/// Holds the half-open probe slot. Dropping it armed, which happens when
/// the caller abandons the probe, charges the breaker.
struct ProbeGuard<'a> {
    service: &'a RetryService,
    context: &'a str,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn arm(service: &'a RetryService, context: &'a str) -> Self {
        Self {
            service,
            context,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(context = self.context, "Probe cancelled before it settled");
            self.service.circuit().record_failure(now_ms());
        }
    }
}
