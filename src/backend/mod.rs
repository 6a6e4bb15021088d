//! Backend executors — issue one request to one endpoint
//!
//! An executor owns whatever connection state a single endpoint needs and
//! turns a request into exactly one response, mapping transport failures
//! into the response status taxonomy. Two implementations: `fake` sleeps
//! the duration hint, `http` calls the endpoint's execute API over HTTP/2.

pub mod fake;
pub mod http;

pub use fake::FakeExecutor;
pub use http::HttpExecutor;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::BackendConfig;
use crate::error::{Result, ServeError};
use crate::workload::{Request, Response};

/// Issues backend calls for one endpoint.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the request against this endpoint, producing its response.
    async fn execute(&self, ctx: &CancellationToken, req: Request) -> Response;

    /// Release connection state. Called asynchronously when the endpoint
    /// leaves the ready set.
    async fn close(&self);
}

/// Per-call timeout policy: the duration hint scaled by an SLO factor,
/// floored at a base timeout.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub slo_factor: f64,
}

impl TimeoutPolicy {
    pub fn for_request(&self, req: &Request) -> Duration {
        let slo = req.duration_hint.mul_f64(self.slo_factor);
        slo.max(self.base)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(15),
            slo_factor: 5.0,
        }
    }
}

/// Constructs executors for newly-ready endpoints.
///
/// Threaded through the dispatcher at construction so the implementation
/// choice is immutable configuration, not global state.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    framework: String,
    timeout: TimeoutPolicy,
    pool_concurrency: usize,
}

impl BackendFactory {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            framework: cfg.framework.clone(),
            timeout: TimeoutPolicy {
                base: Duration::from_secs(cfg.base_timeout_secs),
                slo_factor: cfg.slo_factor,
            },
            pool_concurrency: cfg.pool_concurrency,
        }
    }

    /// A factory producing fake executors (for tests and the demo).
    pub fn fake() -> Self {
        Self::from_config(&BackendConfig::default())
    }

    /// Build an executor for `address`.
    pub fn create(&self, address: &str) -> Result<Arc<dyn Executor>> {
        match self.framework.as_str() {
            "fake" => Ok(Arc::new(FakeExecutor::new())),
            "http" => Ok(Arc::new(HttpExecutor::new(
                address,
                self.timeout,
                self.pool_concurrency,
            )?)),
            other => Err(ServeError::Backend(format!(
                "invalid backend framework: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_floor() {
        let policy = TimeoutPolicy::default();
        // 100ms hint × 5 = 500ms, floored at 15s.
        let req = Request::new("r1", "default/hello", 100);
        assert_eq!(policy.for_request(&req), Duration::from_secs(15));
    }

    #[test]
    fn test_timeout_slo_dominates() {
        let policy = TimeoutPolicy::default();
        // 10s hint × 5 = 50s > 15s base.
        let req = Request::new("r1", "default/hello", 10_000);
        assert_eq!(policy.for_request(&req), Duration::from_secs(50));
    }

    #[test]
    fn test_factory_creates_fake() {
        let factory = BackendFactory::fake();
        assert!(factory.create("10.128.0.1:50051").is_ok());
    }

    #[test]
    fn test_factory_creates_http() {
        let factory = BackendFactory::from_config(&BackendConfig {
            framework: "http".to_string(),
            ..BackendConfig::default()
        });
        assert!(factory.create("10.128.0.1:50051").is_ok());
    }

    #[test]
    fn test_factory_rejects_unknown() {
        let factory = BackendFactory {
            framework: "quic".to_string(),
            timeout: TimeoutPolicy::default(),
            pool_concurrency: 1,
        };
        let result = factory.create("10.128.0.1:50051");
        assert!(matches!(result, Err(ServeError::Backend(_))));
    }
}
