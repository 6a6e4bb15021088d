//! HTTP executor — pooled HTTP/2 calls to a workload endpoint
//!
//! Owns a fixed-size FIFO of client handles per endpoint, bounding the
//! connections held against one pod. A call takes a handle, posts the
//! work request, and returns the handle; when the pool runs dry a fresh
//! batch is seeded rather than blocking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::backend::{Executor, TimeoutPolicy};
use crate::error::{Result, ServeError};
use crate::workload::{Request, Response, ResponseStatus};

/// Wire body of the execute call
#[derive(Debug, Serialize)]
struct WorkRequest<'a> {
    id: &'a str,
    runtime_millis: u64,
}

/// Wire body of the execute reply
#[derive(Debug, Deserialize)]
struct WorkReply {
    runtime_micros: u64,
}

/// Pooled HTTP executor for one endpoint.
pub struct HttpExecutor {
    url: String,
    timeout: TimeoutPolicy,
    pool: (
        async_channel::Sender<reqwest::Client>,
        async_channel::Receiver<reqwest::Client>,
    ),
    pool_concurrency: usize,
}

impl HttpExecutor {
    pub fn new(address: &str, timeout: TimeoutPolicy, pool_concurrency: usize) -> Result<Self> {
        let executor = Self {
            url: format!("http://{}/execute", address),
            timeout,
            pool: async_channel::unbounded(),
            pool_concurrency,
        };
        executor.seed_pool()?;
        Ok(executor)
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .http2_prior_knowledge()
            .build()
            .map_err(|e| ServeError::Backend(format!("failed to build client: {}", e)))
    }

    /// Push `pool_concurrency` handles sharing one connection.
    fn seed_pool(&self) -> Result<()> {
        let client = self.build_client()?;
        for _ in 0..self.pool_concurrency {
            // Unbounded channel: try_send only fails when closed.
            self.pool
                .0
                .try_send(client.clone())
                .map_err(|_| ServeError::Backend("connection pool closed".to_string()))?;
        }
        Ok(())
    }

    fn checkout(&self) -> Result<reqwest::Client> {
        match self.pool.1.try_recv() {
            Ok(client) => Ok(client),
            Err(_) => {
                // Pool exhausted by concurrent calls; seed another batch.
                self.seed_pool()?;
                self.pool
                    .1
                    .try_recv()
                    .map_err(|_| ServeError::Backend("connection pool closed".to_string()))
            }
        }
    }

    fn status_for(err: &reqwest::Error) -> ResponseStatus {
        if err.is_connect() {
            ResponseStatus::FailConnect
        } else if err.is_timeout() {
            // Deadline expired waiting for the reply.
            ResponseStatus::FailRecv
        } else if err.is_decode() {
            ResponseStatus::FailUnmarshal
        } else if err.is_request() || err.is_body() {
            ResponseStatus::FailSend
        } else {
            ResponseStatus::FailRecv
        }
    }

    async fn call(&self, req: &mut Request) -> (ResponseStatus, Duration) {
        let client = match self.checkout() {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "no client for endpoint");
                return (ResponseStatus::FailConnect, Duration::ZERO);
            }
        };

        req.gateway_send = Some(Instant::now());
        let result = client
            .post(&self.url)
            .timeout(self.timeout.for_request(req))
            .json(&WorkRequest {
                id: &req.id,
                runtime_millis: req.duration_hint.as_millis() as u64,
            })
            .send()
            .await;
        // The handle goes back regardless of outcome; failed connections
        // are re-established lazily by the client.
        let _ = self.pool.0.try_send(client);

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "backend call failed");
                return (Self::status_for(&err), Duration::ZERO);
            }
        };
        if reply.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (ResponseStatus::FailOverflow, Duration::ZERO);
        }
        if !reply.status().is_success() {
            tracing::warn!(url = %self.url, status = %reply.status(), "backend rejected call");
            return (ResponseStatus::FailRecv, Duration::ZERO);
        }
        match reply.json::<WorkReply>().await {
            Ok(body) => (
                ResponseStatus::Success,
                Duration::from_micros(body.runtime_micros),
            ),
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "backend reply undecodable");
                (ResponseStatus::FailUnmarshal, Duration::ZERO)
            }
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, ctx: &CancellationToken, mut req: Request) -> Response {
        let (status, runtime) = tokio::select! {
            biased;
            _ = ctx.cancelled() => (ResponseStatus::FailRecv, Duration::ZERO),
            out = self.call(&mut req) => out,
        };
        Response {
            status,
            gateway_recv: Some(Instant::now()),
            client_recv: None,
            runtime,
            request: req,
        }
    }

    async fn close(&self) {
        // Draining the pool drops the last handles to the connection.
        self.pool.1.close();
        while self.pool.1.try_recv().is_ok() {}
    }
}
