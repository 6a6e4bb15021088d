//! # Serveplane
//!
//! A request-driven serverless serving plane with Knative-style
//! autoscaling, built for benchmarking scheduling and autoscaling stacks.
//!
//! ## Architecture
//!
//! ```text
//!            requests                        responses
//! Client ──▶ Gateway relay (per target) ──▶ PodDispatcher ──▶ Executor
//!                 │    ▲                        tokens          (pod)
//!         req_in  │    │ req_out
//!                 ▼    │
//!             Autoscaler ──▶ KpaDecider ──▶ ReplicaScaler ──▶ cluster
//!                  ▲              │
//!                  └── Collector ◀┘  (stable / panic windows)
//! ```
//!
//! Requests enter through per-target unbounded buffers; a relay stamps
//! them, notifies the autoscaler, and hands them to the target's
//! dispatcher, which load-balances over ready endpoints with a
//! token-credit scheme. Responses fan into one shared output. In
//! parallel, each active target's decider is ticked, and a bounded
//! worker pool applies the desired replica counts.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use serveplane::{config::ServeConfig, Gateway};
//!
//! let config = ServeConfig::from_yaml("kpa:\n  targetConcurrency: 10\n")?;
//! let gateway = Gateway::new(&config, &keys, factory, cluster, scaler)?;
//! let root = tokio_util::sync::CancellationToken::new();
//! gateway.run(root.clone());
//! ```

pub mod autoscaler;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod workload;

// Re-export main types
pub use error::{Result, ServeError};
pub use gateway::Gateway;
pub use workload::{Request, Response, ResponseStatus};
