//! Replica scaler — trait and implementations for applying replica counts
//!
//! Provides the `ReplicaScaler` async trait with two implementations:
//! - `HttpReplicaScaler` — calls an orchestrator scale API over HTTP
//! - `MockReplicaScaler` — records calls in memory (for tests)
//!
//! An in-memory cluster implementation also lives behind this trait; see
//! [`crate::cluster::InMemoryCluster`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Result, ServeError};

/// Applies a desired replica count to a target.
///
/// Contract: calling with the target's current replica count is a no-op
/// returning success. Failures are surfaced to the caller, which logs
/// them and moves on; the next tick produces a fresh desired count.
#[async_trait]
pub trait ReplicaScaler: Send + Sync {
    /// Set the replica count for `key`.
    async fn scale(&self, key: &str, desired: usize) -> Result<()>;

    /// Scaler name (for logging)
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HttpReplicaScaler — calls an orchestrator scale API over HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ScaleBody {
    desired_replicas: usize,
}

#[derive(Debug, Deserialize)]
struct ReplicaBody {
    replicas: usize,
}

/// Scale API client: `GET/POST {base}/v1/scale/{key}`.
///
/// A `410 Gone` reply is mapped to [`ServeError::TargetDeleting`]; a body
/// containing an `mvcc` corruption marker is mapped to
/// [`ServeError::StorageCorruption`].
pub struct HttpReplicaScaler {
    base_url: String,
    client: reqwest::Client,
}

impl HttpReplicaScaler {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn current_replicas(&self, key: &str) -> Result<usize> {
        let url = format!("{}/v1/scale/{}", self.base_url, key);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            ServeError::TransientCluster(format!("scale API query failed for '{}': {}", key, e))
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServeError::TransientCluster(format!(
                "scale API returned {} for '{}': {}",
                status, key, body
            )));
        }
        let body = resp.json::<ReplicaBody>().await.map_err(|e| {
            ServeError::TransientCluster(format!(
                "failed to parse replica response for '{}': {}",
                key, e
            ))
        })?;
        Ok(body.replicas)
    }
}

#[async_trait]
impl ReplicaScaler for HttpReplicaScaler {
    async fn scale(&self, key: &str, desired: usize) -> Result<()> {
        // No-op when the target is already at the desired count.
        if self.current_replicas(key).await? == desired {
            return Ok(());
        }

        let url = format!("{}/v1/scale/{}", self.base_url, key);
        let resp = self
            .client
            .post(&url)
            .json(&ScaleBody {
                desired_replicas: desired,
            })
            .send()
            .await
            .map_err(|e| {
                ServeError::Scaling(format!("scale API request failed for '{}': {}", key, e))
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::GONE {
            return Err(ServeError::TargetDeleting(key.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("mvcc") {
                return Err(ServeError::StorageCorruption(format!(
                    "scale API reported store corruption for '{}': {}",
                    key, body
                )));
            }
            return Err(ServeError::Scaling(format!(
                "scale API returned {} for '{}': {}",
                status, key, body
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// MockReplicaScaler — records calls for testing
// ---------------------------------------------------------------------------

/// Mock scaler that records every call and tracks replica state.
pub struct MockReplicaScaler {
    calls: Mutex<Vec<(String, usize)>>,
    replicas: Mutex<HashMap<String, usize>>,
    fail_next: AtomicBool,
    fatal_next: AtomicBool,
}

impl MockReplicaScaler {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            replicas: Mutex::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            fatal_next: AtomicBool::new(false),
        }
    }

    /// All recorded `(key, desired)` calls, in order.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }

    /// Current simulated replica count for `key`.
    pub fn replicas(&self, key: &str) -> usize {
        *self.replicas.lock().unwrap().get(key).unwrap_or(&0)
    }

    /// Make the next `scale` call fail with a scaling error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next `scale` call fail with a storage-corruption error.
    pub fn fatal_next(&self) {
        self.fatal_next.store(true, Ordering::SeqCst);
    }
}

impl Default for MockReplicaScaler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaScaler for MockReplicaScaler {
    async fn scale(&self, key: &str, desired: usize) -> Result<()> {
        self.calls.lock().unwrap().push((key.to_string(), desired));
        if self.fatal_next.swap(false, Ordering::SeqCst) {
            return Err(ServeError::StorageCorruption("mvcc: injected".into()));
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServeError::Scaling("injected failure".into()));
        }
        self.replicas
            .lock()
            .unwrap()
            .insert(key.to_string(), desired);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
