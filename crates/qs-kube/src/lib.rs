//! Orchestrator adapter: read and update replica counts
//!
//! Speaks to the Kubernetes scale subresource for the three supported
//! workload kinds. The adapter is the only writer of replica counts;
//! concurrent autoscalers against the same target are last-writer-wins
//! at the API server.

use std::fmt;

use thiserror::Error;

mod client;
mod scaler;

pub use client::{ApiConfig, KubeClient, Scale, ScaleSpec};
pub use scaler::KubeScaler;

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("API URL must be defined")]
    MissingUrl,

    #[error("No scaler has been implemented for '{0}'")]
    UnsupportedKind(String),

    #[error("reading bearer token from '{path}': {source}")]
    TokenFile {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, KubeError>;

/// Workload kinds with a scaler backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    ReplicationController,
}

impl ResourceKind {
    /// Dispatch a kind name to its scaler backend. Kinds without one are
    /// rejected with a stable error so future kinds fail loudly instead
    /// of scaling the wrong resource.
    pub fn for_kind(kind: &str) -> Result<Self> {
        match kind {
            "Deployment" => Ok(ResourceKind::Deployment),
            "ReplicaSet" => Ok(ResourceKind::ReplicaSet),
            "ReplicationController" => Ok(ResourceKind::ReplicationController),
            other => Err(KubeError::UnsupportedKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::ReplicationController => "ReplicationController",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressable workload to autoscale.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl TargetSpec {
    /// Path of the scale subresource for this target. Replication
    /// controllers live in the core group, the rest under apps/v1.
    pub fn scale_path(&self) -> String {
        let (ns, name) = (&self.namespace, &self.name);
        match self.kind {
            ResourceKind::Deployment => {
                format!("/apis/apps/v1/namespaces/{ns}/deployments/{name}/scale")
            }
            ResourceKind::ReplicaSet => {
                format!("/apis/apps/v1/namespaces/{ns}/replicasets/{name}/scale")
            }
            ResourceKind::ReplicationController => {
                format!("/api/v1/namespaces/{ns}/replicationcontrollers/{name}/scale")
            }
        }
    }
}
