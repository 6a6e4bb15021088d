//! Knative-Pod-Autoscaler control loop
//!
//! One `KpaDecider` per target, built at init and never mutated. Each
//! target's ticker starts on its first request and enqueues the key every
//! tick; a bounded worker pool drains the queue, fetching the ready count
//! and applying the decider's output through the `ReplicaScaler`.
//! Deduplication in the queue guarantees serial reconciliation per key.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::autoscaler::decider::{Decider, KpaDecider};
use crate::autoscaler::queue::WorkQueue;
use crate::autoscaler::scaler::ReplicaScaler;
use crate::autoscaler::Autoscaler;
use crate::cluster::ClusterView;
use crate::config::KpaConfig;
use crate::error::Result;
use crate::workload::{Request, Response};

/// Upper bound on concurrently-executing scale calls across all targets.
const MAX_CONCURRENT_SCALERS: usize = 16;

pub struct KpaAutoscaler {
    async_mode: bool,
    tick_interval: Duration,
    deciders: HashMap<String, Arc<KpaDecider>>,
    cluster: Arc<dyn ClusterView>,
    scaler: Arc<dyn ReplicaScaler>,
    queue: Arc<WorkQueue>,
    /// Root context, set once by `run`
    run_ctx: OnceLock<CancellationToken>,
}

impl KpaAutoscaler {
    pub fn new(
        cfg: &KpaConfig,
        keys: &[String],
        cluster: Arc<dyn ClusterView>,
        scaler: Arc<dyn ReplicaScaler>,
    ) -> Self {
        let deciders = keys
            .iter()
            .map(|key| (key.clone(), Arc::new(KpaDecider::new(key.clone(), cfg))))
            .collect();
        tracing::info!(
            concurrency = cfg.target_concurrency,
            max_up = cfg.max_scale_up_rate,
            max_down = cfg.max_scale_down_rate,
            stable_secs = cfg.stable_window_seconds,
            panic_window_pct = cfg.panic_window_percentage,
            panic_thresh_pct = cfg.panic_threshold_percentage,
            delay_secs = cfg.scale_down_delay_seconds,
            tick_secs = cfg.tick_interval_seconds,
            "KPA autoscaler initialized"
        );
        Self {
            async_mode: cfg.async_mode,
            tick_interval: cfg.tick_interval(),
            deciders,
            cluster,
            scaler,
            queue: Arc::new(WorkQueue::new()),
            run_ctx: OnceLock::new(),
        }
    }

    /// The decider registered for `key`; panics on unknown keys since the
    /// registry is fixed at startup.
    fn decider(&self, key: &str) -> &Arc<KpaDecider> {
        self.deciders
            .get(key)
            .unwrap_or_else(|| panic!("scaling error: no decider for key {}", key))
    }

    fn ctx(&self) -> &CancellationToken {
        self.run_ctx
            .get()
            .expect("autoscaler not started: run() must be called before requests flow")
    }

    /// The work queue; exposed for tests that assert dedup behavior.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Last desired replica count for `key`.
    pub fn desired(&self, key: &str) -> usize {
        self.decider(key).desired()
    }

    /// One reconcile-and-apply pass for `key`. The ready count is read
    /// here, inside the worker owning this key's reconciliation.
    async fn scale(&self, key: &str) -> Result<()> {
        let ready = self.cluster.ready_endpoints(key).await?;
        let desired = self.decider(key).reconcile(Instant::now(), ready.len());
        tracing::debug!(key = %key, current = ready.len(), desired, "scaling");
        self.scaler.scale(key, desired).await
    }

    async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let start = Instant::now();
        if let Err(err) = self.scale(&key).await {
            if err.is_fatal() {
                // Storage corruption is unrecoverable; fail the process.
                panic!("fatal scale error for {}: {}", key, err);
            }
            tracing::warn!(key = %key, error = %err, "failed to scale");
        } else {
            tracing::debug!(key = %key, elapsed_ms = start.elapsed().as_millis() as u64, "scaled");
        }
        // Never re-queue on failure; the next tick re-drives the decision.
        self.queue.done(&key);
        true
    }

    fn spawn_ticker(&self, key: String) {
        let queue = self.queue.clone();
        let ctx = self.ctx().clone();
        let interval = self.tick_interval;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    _ = ticker.tick() => queue.add(&key),
                }
            }
        });
    }
}

#[async_trait]
impl Autoscaler for KpaAutoscaler {
    fn framework(&self) -> &'static str {
        "kpa"
    }

    fn bind(&self, ctx: &CancellationToken) {
        // First binding wins; rebinding with the same root is a no-op.
        let _ = self.run_ctx.set(ctx.clone());
    }

    fn req_in(&self, req: &Request) {
        let key = req.target.as_str();
        let decider = self
            .deciders
            .get(key)
            .unwrap_or_else(|| panic!("req in {}: no decider for key {}", req.id, key));
        decider.req_in(req);
        if decider.activate(self.ctx()) {
            self.spawn_ticker(key.to_string());
        }
        // Cold-start kick: in synchronous mode a request arriving while
        // the target is scaled to zero cannot wait for the next tick.
        if !self.async_mode && decider.desired() == 0 {
            self.queue.add(key);
        }
    }

    fn req_out(&self, res: &Response) {
        let key = res.request.target.as_str();
        let decider = self.deciders.get(key).unwrap_or_else(|| {
            panic!("req out {}: no decider for key {}", res.request.id, key)
        });
        decider.req_out(res);
    }

    async fn run(self: Arc<Self>, ctx: CancellationToken) {
        tracing::info!(framework = "kpa", "starting autoscaler");
        self.bind(&ctx);

        let mut workers = Vec::with_capacity(MAX_CONCURRENT_SCALERS);
        for _ in 0..MAX_CONCURRENT_SCALERS {
            let this = self.clone();
            workers.push(tokio::spawn(async move {
                while this.process_next().await {}
            }));
        }

        ctx.cancelled().await;
        self.queue.shut_down();
        for worker in workers {
            // A worker panicking (fatal scale error) is propagated.
            worker.await.expect("autoscaler worker panicked");
        }
        tracing::info!(framework = "kpa", "autoscaler stopped");
    }
}
