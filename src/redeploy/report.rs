//! Outcome of a redeploy run, grouped by Deployment

use indexmap::IndexMap;
use serde::Serialize;

/// One pod observed when its Deployment was patched
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodOutcome {
    pub pod_name: String,
    pub namespace: String,
    /// Timestamp written into the Deployment's pod template
    pub restarted_at: String,
}

/// Result of restarting a single Deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOutcome {
    pub deployment_name: String,
    pub namespace: String,
    pub restarted_at: String,
    pub pods: Vec<PodOutcome>,
}

impl DeploymentOutcome {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.deployment_name)
    }
}

/// Every restarted Deployment keyed by `namespace/name`, in processing order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RedeployReport {
    deployments: IndexMap<String, DeploymentOutcome>,
}

/// Single-name summary: last processed Deployment name plus every pod
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatSummary {
    pub name: Option<String>,
    pub pods: Vec<PodOutcome>,
}

impl RedeployReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a Deployment's outcome. A repeated key replaces the earlier
    /// entry but keeps its position.
    pub fn record(&mut self, outcome: DeploymentOutcome) {
        self.deployments.insert(outcome.key(), outcome);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&DeploymentOutcome> {
        self.deployments.get(&format!("{}/{}", namespace, name))
    }

    pub fn deployments(&self) -> impl Iterator<Item = &DeploymentOutcome> {
        self.deployments.values()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    pub fn pod_count(&self) -> usize {
        self.deployments.values().map(|d| d.pods.len()).sum()
    }

    /// Collapse into one name (last write wins) and one flat pod list
    pub fn flatten(&self) -> FlatSummary {
        let mut summary = FlatSummary::default();
        for outcome in self.deployments.values() {
            summary.name = Some(outcome.deployment_name.clone());
            summary.pods.extend(outcome.pods.iter().cloned());
        }
        summary
    }
}

impl FromIterator<DeploymentOutcome> for RedeployReport {
    fn from_iter<I: IntoIterator<Item = DeploymentOutcome>>(iter: I) -> Self {
        let mut report = Self::new();
        for outcome in iter {
            report.record(outcome);
        }
        report
    }
}
