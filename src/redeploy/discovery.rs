//! Deployment discovery
//!
//! Lists every Deployment in the cluster, keeps those whose name contains the
//! configured substring and resolves their selectors into pod queries.

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info};

use super::selector::LabelQuery;
use crate::cluster::ClusterApi;
use crate::error::{Error, Result};

/// Substring a Deployment name must contain to be restarted
pub const DEFAULT_NAME_FILTER: &str = "database";

/// A Deployment selected for restart
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedDeployment {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    /// Label selector query for the Deployment's pods
    pub pod_selector: String,
}

/// Case-sensitive literal substring match
pub fn name_matches(name: &str, filter: &str) -> bool {
    name.contains(filter)
}

/// List all Deployments and return the ones selected for restart, in list order
pub async fn discover<C>(cluster: &C, name_filter: &str) -> Result<Vec<MatchedDeployment>>
where
    C: ClusterApi + ?Sized,
{
    let deployments = cluster
        .list_deployments()
        .await
        .map_err(Error::DiscoveryError)?;

    let mut matched = Vec::new();
    for deployment in &deployments {
        let name = deployment.name_any();
        if !name_matches(&name, name_filter) {
            debug!(deployment = %name, "Skipping deployment");
            continue;
        }
        matched.push(resolve(deployment)?);
    }

    info!(
        "Matched {} of {} deployments containing '{}'",
        matched.len(),
        deployments.len(),
        name_filter
    );
    Ok(matched)
}

/// Capture a Deployment's identity and resolve its pod selector
pub fn resolve(deployment: &Deployment) -> Result<MatchedDeployment> {
    let name = deployment.name_any();
    let namespace = deployment
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    let invalid = |reason: String| Error::InvalidSelector {
        deployment: name.clone(),
        namespace: namespace.clone(),
        reason,
    };

    let spec = deployment
        .spec
        .as_ref()
        .ok_or_else(|| invalid("deployment has no spec".to_string()))?;
    let query = LabelQuery::try_from(&spec.selector).map_err(|e| invalid(e.to_string()))?;

    Ok(MatchedDeployment {
        uid: deployment.uid(),
        pod_selector: query.to_string(),
        name,
        namespace,
    })
}
