//! Pod resolution and restart patching for a single Deployment

use chrono::{DateTime, SecondsFormat, Utc};
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::discovery::MatchedDeployment;
use super::ownership::OwnershipIndex;
use super::report::{DeploymentOutcome, PodOutcome};
use super::Clock;
use crate::cluster::ClusterApi;
use crate::error::{Error, Result};

/// Pod-template annotation rewritten to force a rollout
pub const RESTART_ANNOTATION: &str = "restarted_at";

/// RFC3339, nanosecond precision, `Z` suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Merge patch that only sets the restart annotation on the pod template
pub fn restart_patch(timestamp: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTART_ANNOTATION: timestamp
                    }
                }
            }
        }
    })
}

/// Restart one Deployment and report the pods observed at patch time.
///
/// The patch is sent exactly once, to the Deployment's own namespace, even
/// when no pods currently match its selector.
#[instrument(
    skip(cluster, clock, deployment),
    fields(deployment = %deployment.name, namespace = %deployment.namespace)
)]
pub async fn redeploy_one<C, K>(
    cluster: &C,
    clock: &K,
    deployment: &MatchedDeployment,
    verify_ownership: bool,
) -> Result<DeploymentOutcome>
where
    C: ClusterApi + ?Sized,
    K: Clock + ?Sized,
{
    let mut pods = cluster
        .list_pods(&deployment.pod_selector)
        .await
        .map_err(|source| Error::PodResolutionError {
            deployment: deployment.name.clone(),
            namespace: deployment.namespace.clone(),
            source,
        })?;
    debug!(
        selector = %deployment.pod_selector,
        "Found {} pods",
        pods.len()
    );

    if verify_ownership {
        let index = OwnershipIndex::load(cluster, deployment).await?;
        pods.retain(|pod| {
            let owned = index.owns(pod);
            if !owned {
                debug!(pod = %pod.name_any(), "Excluding pod not owned by deployment");
            }
            owned
        });
    }

    let restarted_at = format_timestamp(clock.now());
    let patch = restart_patch(&restarted_at);

    cluster
        .patch_deployment(&deployment.namespace, &deployment.name, &patch)
        .await
        .map_err(|source| Error::PatchError {
            deployment: deployment.name.clone(),
            namespace: deployment.namespace.clone(),
            pods: pods.iter().map(|p| p.name_any()).collect(),
            source,
        })?;

    info!(restarted_at = %restarted_at, "Patched deployment");

    let pods = pods
        .iter()
        .map(|pod| PodOutcome {
            pod_name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            restarted_at: restarted_at.clone(),
        })
        .collect();

    Ok(DeploymentOutcome {
        deployment_name: deployment.name.clone(),
        namespace: deployment.namespace.clone(),
        restarted_at,
        pods,
    })
}
