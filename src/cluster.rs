//! Cluster surface — ready endpoints and the pod-ready oracle
//!
//! The serving plane never talks to an orchestrator directly; it sees the
//! cluster through [`ClusterView`], which answers "which endpoints are
//! ready for this target right now". The in-memory implementation closes
//! the loop for tests and the demo binary: scaling it up materializes
//! fake endpoints that immediately report ready.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::autoscaler::scaler::ReplicaScaler;
use crate::error::{Result, ServeError};

/// A ready backend instance for one target.
///
/// The name is stable per pod instance; the identity used for token
/// accounting combines name and address so that a restarted pod reusing
/// an address is still a distinct endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Stable instance name (e.g. a pod name)
    pub name: String,
    /// Network address, `host:port`
    pub address: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Identity used to key dispatcher state and tokens.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.address)
    }
}

/// On-demand view of the currently-ready endpoint set per target.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// The currently-ready endpoints for `target`. Transient query
    /// failures map to [`ServeError::TransientCluster`].
    async fn ready_endpoints(&self, target: &str) -> Result<Vec<Endpoint>>;
}

// ---------------------------------------------------------------------------
// InMemoryCluster — fake cluster for tests and the demo binary
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClusterState {
    endpoints: HashMap<String, Vec<Endpoint>>,
    /// Monotonic instance counter per target, so replacements get fresh names
    spawned: HashMap<String, usize>,
    deleting: HashMap<String, bool>,
}

/// In-memory cluster: a [`ClusterView`] whose replica counts are driven
/// by its own [`ReplicaScaler`] implementation.
#[derive(Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current replica count for `target`.
    pub async fn replicas(&self, target: &str) -> usize {
        self.state
            .read()
            .await
            .endpoints
            .get(target)
            .map_or(0, Vec::len)
    }

    /// Mark `target` as being torn down; subsequent scale calls fail with
    /// [`ServeError::TargetDeleting`].
    pub async fn mark_deleting(&self, target: &str) {
        self.state
            .write()
            .await
            .deleting
            .insert(target.to_string(), true);
    }
}

#[async_trait]
impl ClusterView for InMemoryCluster {
    async fn ready_endpoints(&self, target: &str) -> Result<Vec<Endpoint>> {
        Ok(self
            .state
            .read()
            .await
            .endpoints
            .get(target)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReplicaScaler for InMemoryCluster {
    async fn scale(&self, key: &str, desired: usize) -> Result<()> {
        let mut state = self.state.write().await;
        if state.deleting.get(key).copied().unwrap_or(false) {
            return Err(ServeError::TargetDeleting(key.to_string()));
        }
        let spawned = state.spawned.entry(key.to_string()).or_insert(0);
        let mut next_instance = *spawned;
        let endpoints = state.endpoints.entry(key.to_string()).or_default();
        if endpoints.len() == desired {
            return Ok(());
        }
        while endpoints.len() < desired {
            let instance = next_instance;
            next_instance += 1;
            endpoints.push(Endpoint::new(
                format!("{}-pod-{}", key.replace('/', "-"), instance),
                format!("10.128.{}.{}:50051", instance / 250, instance % 250 + 1),
            ));
        }
        endpoints.truncate(desired);
        state.spawned.insert(key.to_string(), next_instance);
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
