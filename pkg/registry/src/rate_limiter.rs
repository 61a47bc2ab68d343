use pkg_constants::registry::*;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Kinds of registry call, each metered by its own bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    ListNamespaces,
    ListServices,
    ListOperations,
    GetOperation,
    DiscoverInstances,
    RegisterInstance,
    DeregisterInstance,
    CreateNamespace,
    CreateService,
}

impl std::fmt::Display for RegistryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("no rate limiter configured for {0}")]
    Unconfigured(RegistryOp),
    #[error("wait for {0} rate limit cancelled")]
    Cancelled(RegistryOp),
}

struct BucketState {
    /// May go negative: outstanding reservations not yet covered by refill.
    tokens: f64,
    last: Instant,
}

struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Take one token and return how long the caller must wait before using it.
    fn reserve(&self) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last = now;
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }

    /// Hand back a reservation that will not be used.
    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tokens = (state.tokens + 1.0).min(self.burst);
    }
}

/// Token-bucket gate in front of every registry call.
pub struct RateLimiter {
    buckets: HashMap<RegistryOp, TokenBucket>,
}

impl RateLimiter {
    /// Build a limiter from `(op, requests per second, burst)` triples.
    /// Ops left out are rejected by [`RateLimiter::wait`].
    pub fn new(limits: impl IntoIterator<Item = (RegistryOp, f64, u32)>) -> Self {
        Self {
            buckets: limits
                .into_iter()
                .map(|(op, rate, burst)| (op, TokenBucket::new(rate, burst)))
                .collect(),
        }
    }

    /// Block until a call of kind `op` is permitted.
    pub async fn wait(
        &self,
        op: RegistryOp,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        let bucket = self
            .buckets
            .get(&op)
            .ok_or(RateLimitError::Unconfigured(op))?;
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled(op));
        }
        let delay = bucket.reserve();
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                bucket.release();
                Err(RateLimitError::Cancelled(op))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        let limit = |op, (rate, burst): (f64, u32)| (op, rate, burst);
        Self::new([
            limit(RegistryOp::ListNamespaces, LIST_NAMESPACES_LIMIT),
            limit(RegistryOp::ListServices, LIST_SERVICES_LIMIT),
            limit(RegistryOp::ListOperations, LIST_OPERATIONS_LIMIT),
            limit(RegistryOp::GetOperation, GET_OPERATION_LIMIT),
            limit(RegistryOp::DiscoverInstances, DISCOVER_INSTANCES_LIMIT),
            limit(RegistryOp::RegisterInstance, REGISTER_INSTANCE_LIMIT),
            limit(RegistryOp::DeregisterInstance, DEREGISTER_INSTANCE_LIMIT),
            limit(RegistryOp::CreateNamespace, CREATE_NAMESPACE_LIMIT),
            limit(RegistryOp::CreateService, CREATE_SERVICE_LIMIT),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let limiter = RateLimiter::new([(RegistryOp::ListServices, 2.0, 3)]);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait(RegistryOp::ListServices, &cancel).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Fourth call needs half a second of refill at 2/s
        limiter.wait(RegistryOp::ListServices, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_op_is_rejected() {
        let limiter = RateLimiter::new([(RegistryOp::ListServices, 1.0, 1)]);
        let cancel = CancellationToken::new();
        assert_eq!(
            limiter.wait(RegistryOp::RegisterInstance, &cancel).await,
            Err(RateLimitError::Unconfigured(RegistryOp::RegisterInstance))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting() {
        let limiter = RateLimiter::new([(RegistryOp::GetOperation, 0.1, 1)]);
        let cancel = CancellationToken::new();
        limiter.wait(RegistryOp::GetOperation, &cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        assert_eq!(
            limiter.wait(RegistryOp::GetOperation, &cancel).await,
            Err(RateLimitError::Cancelled(RegistryOp::GetOperation))
        );
    }

    #[tokio::test]
    async fn test_default_table_covers_every_op() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        for op in [
            RegistryOp::ListNamespaces,
            RegistryOp::ListServices,
            RegistryOp::ListOperations,
            RegistryOp::GetOperation,
            RegistryOp::DiscoverInstances,
            RegistryOp::RegisterInstance,
            RegistryOp::DeregisterInstance,
            RegistryOp::CreateNamespace,
            RegistryOp::CreateService,
        ] {
            assert!(limiter.wait(op, &cancel).await.is_ok());
        }
    }
}
