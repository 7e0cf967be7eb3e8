//! Owner-chain verification for selected pods
//!
//! A pod belongs to a Deployment when one of its owner references points at a
//! ReplicaSet whose controller is that Deployment.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::discovery::MatchedDeployment;
use crate::cluster::ClusterApi;
use crate::error::{Error, Result};

/// UIDs of the ReplicaSets a Deployment controls
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    replica_sets: HashSet<String>,
}

impl OwnershipIndex {
    pub async fn load<C>(cluster: &C, deployment: &MatchedDeployment) -> Result<Self>
    where
        C: ClusterApi + ?Sized,
    {
        let Some(uid) = deployment.uid.as_deref() else {
            warn!(
                deployment = %deployment.name,
                "Deployment has no UID, no pods can be attributed to it"
            );
            return Ok(Self::default());
        };

        let replica_sets = cluster
            .list_replica_sets(&deployment.namespace)
            .await
            .map_err(|source| Error::OwnershipLookupError {
                deployment: deployment.name.clone(),
                namespace: deployment.namespace.clone(),
                source,
            })?;

        let replica_sets = replica_sets
            .iter()
            .filter(|rs| {
                rs.owner_references()
                    .iter()
                    .any(|o| o.kind == "Deployment" && o.uid == uid && o.controller == Some(true))
            })
            .filter_map(|rs| rs.uid())
            .collect::<HashSet<_>>();

        debug!(
            deployment = %deployment.name,
            "Deployment controls {} replicasets",
            replica_sets.len()
        );
        Ok(Self { replica_sets })
    }

    /// The pod's controlling owner is one of the indexed ReplicaSets
    pub fn owns(&self, pod: &Pod) -> bool {
        pod.owner_references().iter().any(|o| {
            o.kind == "ReplicaSet"
                && o.controller == Some(true)
                && self.replica_sets.contains(&o.uid)
        })
    }
}
