//! One-time autoscaler — scale each key once on its first request
//!
//! Applies `initial_scale` to a target the first time a request for it
//! arrives and never touches it again. Useful as a baseline against the
//! KPA control loop.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

use crate::autoscaler::scaler::ReplicaScaler;
use crate::autoscaler::Autoscaler;
use crate::config::OneTimeConfig;
use crate::workload::{Request, Response};

pub struct OneTimeAutoscaler {
    /// Keys seen so far; the key set itself is fixed at startup
    seen: Mutex<HashMap<String, bool>>,
    scaler: Arc<dyn ReplicaScaler>,
    initial_scale: usize,
    run_ctx: OnceLock<CancellationToken>,
}

impl OneTimeAutoscaler {
    pub fn new(cfg: &OneTimeConfig, keys: &[String], scaler: Arc<dyn ReplicaScaler>) -> Self {
        let seen = keys.iter().map(|key| (key.clone(), false)).collect();
        tracing::info!(initial_scale = cfg.initial_scale, "One-time autoscaler initialized");
        Self {
            seen: Mutex::new(seen),
            scaler,
            initial_scale: cfg.initial_scale,
            run_ctx: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Autoscaler for OneTimeAutoscaler {
    fn framework(&self) -> &'static str {
        "one-time"
    }

    fn bind(&self, ctx: &CancellationToken) {
        let _ = self.run_ctx.set(ctx.clone());
    }

    fn req_in(&self, req: &Request) {
        self.run_ctx
            .get()
            .expect("autoscaler not started: run() must be called before requests flow");
        let key = req.target.as_str();
        let mut seen = self.seen.lock().unwrap();
        let entry = seen
            .get_mut(key)
            .unwrap_or_else(|| panic!("req in {}: no entry for key {}", req.id, key));
        if *entry {
            return;
        }
        *entry = true;

        let scaler = self.scaler.clone();
        let key = key.to_string();
        let desired = self.initial_scale;
        tokio::spawn(async move {
            if let Err(err) = scaler.scale(&key, desired).await {
                tracing::warn!(key = %key, error = %err, "failed to scale");
            }
        });
    }

    fn req_out(&self, _res: &Response) {}

    async fn run(self: Arc<Self>, ctx: CancellationToken) {
        self.bind(&ctx);
        ctx.cancelled().await;
    }
}
