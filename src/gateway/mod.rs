//! Gateway — per-target request relays with a shared response fan-in
//!
//! For each target key the gateway owns an external input buffer, an
//! internal input buffer consumed by that target's dispatcher, and an
//! internal output buffer the dispatcher produces into; responses from
//! all targets fan into one shared external output. All buffers are
//! unbounded by design: the relay must never deadlock on backpressure.
//!
//! One relay task per key forwards traffic both ways, firing the
//! autoscaler's `req_in`/`req_out` hooks in dequeue order. The key set
//! is fixed once the gateway is built.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::autoscaler::{new_autoscaler, Autoscaler, ReplicaScaler};
use crate::backend::BackendFactory;
use crate::cluster::{ClusterView, Endpoint};
use crate::config::ServeConfig;
use crate::dispatch::PodDispatcher;
use crate::error::{Result, ServeError};
use crate::workload::{Request, Response, ResponseStatus};

/// Channel ends a relay task owns for one key.
struct RelayChannels {
    external_input: mpsc::UnboundedReceiver<Request>,
    internal_input: mpsc::UnboundedSender<Request>,
    internal_output: mpsc::UnboundedReceiver<Response>,
}

/// The serving-plane gateway.
pub struct Gateway {
    external_inputs: HashMap<String, mpsc::UnboundedSender<Request>>,
    external_output_tx: mpsc::UnboundedSender<Response>,
    external_output_rx: Mutex<Option<mpsc::UnboundedReceiver<Response>>>,
    relays: Mutex<HashMap<String, RelayChannels>>,
    dispatchers: HashMap<String, Arc<PodDispatcher>>,
    autoscaler: Arc<dyn Autoscaler>,
    trace_period: Duration,
}

impl Gateway {
    /// Build the gateway over a fixed key set: channels and one
    /// dispatcher per key, plus the configured autoscaler framework.
    pub fn new(
        config: &ServeConfig,
        keys: &[String],
        factory: BackendFactory,
        cluster: Arc<dyn ClusterView>,
        scaler: Arc<dyn ReplicaScaler>,
    ) -> Result<Self> {
        config.validate()?;

        let (external_output_tx, external_output_rx) = mpsc::unbounded_channel();
        let mut external_inputs = HashMap::new();
        let mut relays = HashMap::new();
        let mut dispatchers = HashMap::new();

        for key in keys {
            let (ext_in_tx, ext_in_rx) = mpsc::unbounded_channel();
            let (int_in_tx, int_in_rx) = mpsc::unbounded_channel();
            let (int_out_tx, int_out_rx) = mpsc::unbounded_channel();

            external_inputs.insert(key.clone(), ext_in_tx);
            relays.insert(
                key.clone(),
                RelayChannels {
                    external_input: ext_in_rx,
                    internal_input: int_in_tx,
                    internal_output: int_out_rx,
                },
            );
            dispatchers.insert(
                key.clone(),
                Arc::new(PodDispatcher::new(
                    key.clone(),
                    factory.clone(),
                    int_in_rx,
                    int_out_tx,
                )),
            );
            tracing::debug!(key = %key, "registered target");
        }

        let autoscaler = new_autoscaler(config, keys, cluster, scaler)?;
        tracing::info!(
            targets = keys.len(),
            framework = autoscaler.framework(),
            "gateway built"
        );

        Ok(Self {
            external_inputs,
            external_output_tx,
            external_output_rx: Mutex::new(Some(external_output_rx)),
            relays: Mutex::new(relays),
            dispatchers,
            autoscaler,
            trace_period: config.trace_period(),
        })
    }

    /// Sender for enqueuing requests to `target`.
    ///
    /// # Panics
    ///
    /// Panics on a key the gateway was not built with; the key set is
    /// fixed at startup.
    pub fn request_sender(&self, target: &str) -> mpsc::UnboundedSender<Request> {
        self.external_inputs
            .get(target)
            .unwrap_or_else(|| panic!("no such target: {}", target))
            .clone()
    }

    /// Take the shared response receiver. Yields every response for
    /// every target; callable once.
    pub fn take_response_receiver(&self) -> mpsc::UnboundedReceiver<Response> {
        self.external_output_rx
            .lock()
            .unwrap()
            .take()
            .expect("response receiver already taken")
    }

    /// The autoscaler attached to this gateway.
    pub fn autoscaler(&self) -> &Arc<dyn Autoscaler> {
        &self.autoscaler
    }

    /// Feed a changed ready-endpoint set to `target`'s dispatcher.
    pub async fn reconcile_endpoints(&self, target: &str, ready: &[Endpoint]) -> Result<()> {
        let dispatcher = self
            .dispatchers
            .get(target)
            .ok_or_else(|| ServeError::Config(format!("no dispatcher for target {}", target)))?;
        dispatcher.reconcile(ready).await
    }

    /// Start relays, dispatchers, and the autoscaler. Tasks run until
    /// `ctx` is cancelled.
    pub fn run(&self, ctx: CancellationToken) {
        let mut relays = self.relays.lock().unwrap();
        if relays.is_empty() {
            tracing::warn!("gateway run() called twice, ignoring");
            return;
        }
        // Bind before any relay can fire a hook.
        self.autoscaler.bind(&ctx);
        for (key, channels) in relays.drain() {
            let dispatcher = self.dispatchers[&key].clone();
            tokio::spawn(dispatcher.run(ctx.clone()));
            tokio::spawn(relay(
                key,
                channels,
                self.autoscaler.clone(),
                self.external_output_tx.clone(),
                self.trace_period,
                ctx.clone(),
            ));
        }
        tokio::spawn(self.autoscaler.clone().run(ctx));
    }
}

/// Relay loop for one key: external input → hooks + dispatcher, and
/// dispatcher output → hooks + shared external output.
async fn relay(
    key: String,
    mut channels: RelayChannels,
    autoscaler: Arc<dyn Autoscaler>,
    external_output: mpsc::UnboundedSender<Response>,
    trace_period: Duration,
    ctx: CancellationToken,
) {
    tracing::debug!(key = %key, "starting request/response relay");
    let mut n_send: u64 = 0;
    let mut n_recv: u64 = 0;
    let mut last_send_trace = Instant::now();
    let mut last_recv_trace = Instant::now();
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            req = channels.external_input.recv() => {
                let Some(mut req) = req else { return };
                if req.target != key {
                    tracing::error!(key = %key, req = %req.id, target = %req.target, "failed to relay request: invalid target");
                    let res = Response::failure(req, ResponseStatus::InvalidTarget);
                    let _ = external_output.send(res);
                    continue;
                }
                autoscaler.req_in(&req);
                let now = Instant::now();
                req.gateway_recv = Some(now);
                n_send += 1;
                if now.duration_since(last_send_trace) > trace_period {
                    last_send_trace = now;
                    tracing::debug!(key = %key, req = %req.id, outstanding = n_send - n_recv, sent = n_send, received = n_recv, "relay send");
                }
                let _ = channels.internal_input.send(req);
            }
            res = channels.internal_output.recv() => {
                let Some(res) = res else { return };
                autoscaler.req_out(&res);
                n_recv += 1;
                let now = Instant::now();
                if now.duration_since(last_recv_trace) > trace_period {
                    last_recv_trace = now;
                    tracing::debug!(key = %key, req = %res.request.id, outstanding = n_send - n_recv, sent = n_send, received = n_recv, "relay recv");
                }
                let _ = external_output.send(res);
            }
        }
    }
}
