//! Fake executor — simulates a backend by sleeping the duration hint

use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::Executor;
use crate::workload::{Request, Response, ResponseStatus};

/// Executor that sleeps for the request's duration hint and succeeds.
/// In-flight calls run to completion on shutdown.
#[derive(Debug, Default)]
pub struct FakeExecutor;

impl FakeExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, _ctx: &CancellationToken, mut req: Request) -> Response {
        let start = Instant::now();
        req.gateway_send = Some(start);
        tokio::time::sleep(req.duration_hint).await;
        Response {
            status: ResponseStatus::Success,
            gateway_recv: Some(Instant::now()),
            client_recv: None,
            runtime: start.elapsed(),
            request: req,
        }
    }

    async fn close(&self) {}
}
