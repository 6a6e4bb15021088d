//! Autoscaling — per-target deciders, the scale work queue, and scalers
//!
//! The autoscaler observes per-target concurrency through the gateway's
//! relay hooks and periodically drives each target's replica count toward
//! the decider's output. Two frameworks are provided: the KPA control
//! loop and a one-shot initial scaler.

pub mod decider;
pub mod kpa;
pub mod onetime;
pub mod queue;
pub mod scaler;

pub use kpa::KpaAutoscaler;
pub use onetime::OneTimeAutoscaler;
pub use queue::WorkQueue;
pub use scaler::{HttpReplicaScaler, MockReplicaScaler, ReplicaScaler};

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterView;
use crate::config::ServeConfig;
use crate::error::{Result, ServeError};
use crate::workload::{Request, Response};

/// Autoscaler capability, hooked into the gateway relay.
///
/// `req_in`/`req_out` must return promptly; the relay calls them inline.
/// Both panic on a key with no registered decider: the key set is fixed
/// at startup, so an unknown key is a programming error.
#[async_trait]
pub trait Autoscaler: Send + Sync {
    /// Framework name (for logging)
    fn framework(&self) -> &'static str;

    /// Register the root context before any request flows. `run` binds
    /// on entry as well; the gateway calls this synchronously so hooks
    /// fired before the run task is scheduled still find the context.
    fn bind(&self, ctx: &CancellationToken);

    /// Observe a request entering its target.
    fn req_in(&self, req: &Request);

    /// Observe a request leaving its target.
    fn req_out(&self, res: &Response);

    /// Run the control loop until `ctx` ends. Returning guarantees the
    /// work queue is shut down and all workers have exited.
    async fn run(self: Arc<Self>, ctx: CancellationToken);
}

/// Build the configured autoscaler framework over a fixed key set.
pub fn new_autoscaler(
    config: &ServeConfig,
    keys: &[String],
    cluster: Arc<dyn ClusterView>,
    scaler: Arc<dyn ReplicaScaler>,
) -> Result<Arc<dyn Autoscaler>> {
    match config.framework.as_str() {
        "kpa" => Ok(Arc::new(KpaAutoscaler::new(
            &config.kpa(),
            keys,
            cluster,
            scaler,
        ))),
        "one-time" => Ok(Arc::new(OneTimeAutoscaler::new(
            &config.one_time(),
            keys,
            scaler,
        ))),
        other => Err(ServeError::Config(format!(
            "Unknown autoscaler framework '{}'",
            other
        ))),
    }
}
