//! Error types for the redeploy run

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Listing Deployments cluster-wide failed; nothing was patched
    #[error("failed to list deployments: {0}")]
    DiscoveryError(#[source] kube::Error),

    /// A matched Deployment carries a selector that cannot be turned into a pod query
    #[error("deployment {namespace}/{deployment} has an unusable selector: {reason}")]
    InvalidSelector {
        deployment: String,
        namespace: String,
        reason: String,
    },

    /// Listing pods for a matched Deployment failed
    #[error("failed to list pods for deployment {namespace}/{deployment}: {source}")]
    PodResolutionError {
        deployment: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },

    /// Listing ReplicaSets for ownership verification failed
    #[error("failed to list replicasets in {namespace} for deployment {deployment}: {source}")]
    OwnershipLookupError {
        deployment: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },

    /// The restart patch was rejected
    #[error("failed to patch deployment {namespace}/{deployment} (pods: {}): {source}", .pods.join(", "))]
    PatchError {
        deployment: String,
        namespace: String,
        pods: Vec<String>,
        #[source]
        source: kube::Error,
    },

    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    /// Configuration or kubeconfig error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Name of the Deployment the failure is attributed to, if any
    pub fn deployment(&self) -> Option<&str> {
        match self {
            Error::InvalidSelector { deployment, .. }
            | Error::PodResolutionError { deployment, .. }
            | Error::OwnershipLookupError { deployment, .. }
            | Error::PatchError { deployment, .. } => Some(deployment),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
