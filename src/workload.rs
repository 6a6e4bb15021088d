//! Workload data model — requests, responses, and their status taxonomy
//!
//! A `Request` is produced by the client and owned by whichever stage
//! currently holds it; hand-off through a channel transfers ownership.
//! The terminal stage folds the request into its `Response`, so every
//! request yields exactly one response on the external output.

use std::fmt;
use std::time::{Duration, Instant};

/// Terminal status of one request's journey through the plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// Backend executed the request and replied
    Success,
    /// Backend rejected the request due to queue overflow
    FailOverflow,
    /// No live endpoint was acquired within the dispatch timeout
    FailTimeout,
    /// Could not establish a connection to the backend
    FailConnect,
    /// The request could not be sent
    FailSend,
    /// The backend reply was not received (including deadline expiry)
    FailRecv,
    /// The backend reply could not be decoded
    FailUnmarshal,
    /// The request was addressed to a target the relay does not serve
    InvalidTarget,
}

impl ResponseStatus {
    /// Whether the request completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Success)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::FailOverflow => "FAIL_OVERFLOW",
            Self::FailTimeout => "FAIL_TIMEOUT",
            Self::FailConnect => "FAIL_CONNECT",
            Self::FailSend => "FAIL_SEND",
            Self::FailRecv => "FAIL_RECV",
            Self::FailUnmarshal => "FAIL_UNMARSHAL",
            Self::InvalidTarget => "INVALID_TARGET",
        };
        write!(f, "{}", s)
    }
}

/// One invocation travelling through the serving plane.
///
/// Timestamp fields start unset and are written once by the component at
/// that stage: `client_send` by the producer, `gateway_recv` by the relay,
/// `gateway_send` by the executor about to issue the backend call.
#[derive(Debug, Clone)]
pub struct Request {
    /// Opaque identity, supplied by the producer
    pub id: String,
    /// Key of the replicated workload this request addresses
    pub target: String,
    /// Requested runtime; backends use it to simulate work
    pub duration_hint: Duration,
    /// When the client handed the request to the gateway
    pub client_send: Option<Instant>,
    /// When the relay dequeued the request
    pub gateway_recv: Option<Instant>,
    /// When the executor issued the backend call
    pub gateway_send: Option<Instant>,
}

impl Request {
    /// Create a request with its client-send timestamp stamped now.
    pub fn new(id: impl Into<String>, target: impl Into<String>, duration_hint_ms: u64) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            duration_hint: Duration::from_millis(duration_hint_ms),
            client_send: Some(Instant::now()),
            gateway_recv: None,
            gateway_send: None,
        }
    }
}

/// The single response produced for a request.
#[derive(Debug, Clone)]
pub struct Response {
    /// The request this response answers; ownership folds in here
    pub request: Request,
    /// Terminal status
    pub status: ResponseStatus,
    /// When the executor received the backend reply
    pub gateway_recv: Option<Instant>,
    /// When the client dequeued the response
    pub client_recv: Option<Instant>,
    /// Runtime observed by the backend
    pub runtime: Duration,
}

impl Response {
    /// Synthesize a failure response carrying no backend observations.
    pub fn failure(request: Request, status: ResponseStatus) -> Self {
        Self {
            request,
            status,
            gateway_recv: None,
            client_recv: None,
            runtime: Duration::ZERO,
        }
    }

    /// Human-readable latency breakdown relative to the client send time.
    /// Unstamped stages render as `N/A`.
    pub fn summary(&self) -> String {
        let base = self.request.client_send;
        let rel = |t: Option<Instant>| match (base, t) {
            (Some(b), Some(t)) => format!("+{:.3}ms", t.duration_since(b).as_secs_f64() * 1e3),
            _ => "N/A".to_string(),
        };
        format!(
            "id={} status={} gw_recv_req={} gw_send_req={} gw_recv_res={} client_recv={} runtime={}ms/{}ms",
            self.request.id,
            self.status,
            rel(self.request.gateway_recv),
            rel(self.request.gateway_send),
            rel(self.gateway_recv),
            rel(self.client_recv),
            self.runtime.as_millis(),
            self.request.duration_hint.as_millis(),
        )
    }
}
