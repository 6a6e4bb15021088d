//! Pod dispatcher — token-credit load balancing over ready endpoints
//!
//! Each ready endpoint contributes `service_concurrency` tokens to a
//! shared FIFO; dispatching a request means redeeming a token, calling
//! that endpoint's executor, and returning the token. Tokens belonging
//! to endpoints that have since been removed are silently discarded on
//! redemption, so endpoint churn never wedges the FIFO.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendFactory, Executor};
use crate::cluster::Endpoint;
use crate::error::{Result, ServeError};
use crate::workload::{Request, Response, ResponseStatus};

/// Tokens granted per ready endpoint.
const SERVICE_CONCURRENCY: usize = 1;

/// How long a request may wait for a live token before failing.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-target request dispatcher.
pub struct PodDispatcher {
    target: String,
    /// Endpoint identity → executor. Reconcile is the sole writer.
    endpoints: RwLock<HashMap<String, Arc<dyn Executor>>>,
    /// Token FIFO of endpoint identities; multi-producer multi-consumer
    tokens: (async_channel::Sender<String>, async_channel::Receiver<String>),
    factory: BackendFactory,
    service_concurrency: usize,
    dispatch_timeout: Duration,
    req_rx: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    res_tx: mpsc::UnboundedSender<Response>,
}

impl PodDispatcher {
    pub fn new(
        target: impl Into<String>,
        factory: BackendFactory,
        req_rx: mpsc::UnboundedReceiver<Request>,
        res_tx: mpsc::UnboundedSender<Response>,
    ) -> Self {
        Self {
            target: target.into(),
            endpoints: RwLock::new(HashMap::new()),
            tokens: async_channel::unbounded(),
            factory,
            service_concurrency: SERVICE_CONCURRENCY,
            dispatch_timeout: DISPATCH_TIMEOUT,
            req_rx: Mutex::new(Some(req_rx)),
            res_tx,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().unwrap().len()
    }

    /// Reconcile the endpoint set against the currently-ready pods.
    /// New endpoints are constructed concurrently and granted tokens;
    /// removed endpoints are closed asynchronously and their outstanding
    /// tokens die on redemption. Construction failures are aggregated.
    pub async fn reconcile(&self, ready: &[Endpoint]) -> Result<()> {
        let desired: HashMap<String, &Endpoint> =
            ready.iter().map(|ep| (ep.id(), ep)).collect();

        let (add, del) = {
            let existing = self.endpoints.read().unwrap();
            let add: Vec<&Endpoint> = desired
                .iter()
                .filter(|(id, _)| !existing.contains_key(id.as_str()))
                .map(|(_, ep)| *ep)
                .collect();
            let del: Vec<String> = existing
                .keys()
                .filter(|id| !desired.contains_key(id.as_str()))
                .cloned()
                .collect();
            (add, del)
        };
        if !add.is_empty() || !del.is_empty() {
            tracing::debug!(
                target = %self.target,
                ready = ready.len(),
                add = add.len(),
                del = del.len(),
                "reconciling endpoints"
            );
        }

        // Construct new executors concurrently; a handshake may be slow.
        let mut constructions = JoinSet::new();
        for ep in add {
            let factory = self.factory.clone();
            let ep = ep.clone();
            constructions
                .spawn_blocking(move || (ep.id(), factory.create(&ep.address)));
        }
        let mut errors = Vec::new();
        while let Some(joined) = constructions.join_next().await {
            let (id, built) = joined.expect("endpoint construction task panicked");
            match built {
                Ok(executor) => {
                    self.endpoints.write().unwrap().insert(id.clone(), executor);
                    for _ in 0..self.service_concurrency {
                        let _ = self.tokens.0.try_send(id.clone());
                    }
                }
                Err(err) => errors.push(format!("{}: {}", id, err)),
            }
        }

        for id in del {
            let removed = self.endpoints.write().unwrap().remove(&id);
            if let Some(executor) = removed {
                tokio::spawn(async move { executor.close().await });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServeError::Backend(format!(
                "failed to start {} backend(s): {}",
                errors.len(),
                errors.join("; ")
            )))
        }
    }

    /// Redeem tokens until one maps to a live endpoint, or time out.
    async fn acquire(&self, ctx: &CancellationToken) -> Option<(String, Arc<dyn Executor>)> {
        let wait = async {
            loop {
                match self.tokens.1.recv().await {
                    Ok(id) => {
                        // Tokens of removed endpoints are discarded here.
                        let executor = self.endpoints.read().unwrap().get(&id).cloned();
                        if let Some(executor) = executor {
                            return Some((id, executor));
                        }
                    }
                    Err(_) => return None,
                }
            }
        };
        tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            out = tokio::time::timeout(self.dispatch_timeout, wait) => out.ok().flatten(),
        }
    }

    /// Dispatch one request, producing exactly one response.
    pub async fn dispatch(&self, ctx: &CancellationToken, req: Request) {
        let Some((id, executor)) = self.acquire(ctx).await else {
            tracing::warn!(target = %self.target, req = %req.id, "timeout dispatching request");
            let res = Response::failure(req, ResponseStatus::FailTimeout);
            let _ = self.res_tx.send(res);
            return;
        };
        let res = executor.execute(ctx, req).await;
        let _ = self.tokens.0.try_send(id);
        let _ = self.res_tx.send(res);
    }

    /// Drain requests until `ctx` ends, dispatching each on its own task
    /// so one slow executor cannot block the rest.
    pub async fn run(self: Arc<Self>, ctx: CancellationToken) {
        tracing::debug!(target = %self.target, "starting pod dispatcher");
        let mut req_rx = self
            .req_rx
            .lock()
            .unwrap()
            .take()
            .expect("dispatcher run() called twice");
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                req = req_rx.recv() => {
                    let Some(req) = req else { return };
                    let this = self.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move { this.dispatch(&ctx, req).await });
                }
            }
        }
    }

    /// Endpoint identities with live executors (for tests).
    pub fn endpoint_ids(&self) -> HashSet<String> {
        self.endpoints.read().unwrap().keys().cloned().collect()
    }
}
