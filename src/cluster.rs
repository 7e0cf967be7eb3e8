//! Cluster API access for the redeploy run
//!
//! The run only talks to the cluster through [`ClusterApi`], so the
//! orchestration can be driven by an in-memory cluster in tests and by
//! [`KubeCluster`] in production.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Operations the redeploy run needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List Deployments in every namespace
    async fn list_deployments(&self) -> Result<Vec<Deployment>, kube::Error>;

    /// List pods in every namespace matching a label selector query
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, kube::Error>;

    /// List ReplicaSets in a single namespace
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, kube::Error>;

    /// Apply a strategic-merge patch to a Deployment
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Deployment, kube::Error>;
}

/// [`ClusterApi`] backed by a live `kube::Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig and an explicitly selected context.
    ///
    /// With neither set, falls back to the in-cluster config or the
    /// kubeconfig's current context.
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        if kubeconfig.is_none() && context.is_none() {
            let client = Client::try_default().await.map_err(Error::KubeError)?;
            info!("Using default Kubernetes client configuration");
            return Ok(Self::new(client));
        }

        let kubeconfig = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path).map_err(|e| {
                Error::ConfigError(format!(
                    "failed to load kubeconfig from {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => Kubeconfig::read()
                .map_err(|e| Error::ConfigError(format!("failed to load kubeconfig: {}", e)))?,
        };

        if let Some(context) = context {
            ensure_context(&kubeconfig, context)?;
        }

        let options = KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::ConfigError(format!("invalid kubeconfig: {}", e)))?;

        let client = Client::try_from(config).map_err(Error::KubeError)?;
        info!(context = ?context, "Kubernetes client created");
        Ok(Self::new(client))
    }
}

/// Reject a context name that the kubeconfig does not define
pub fn ensure_context(kubeconfig: &Kubeconfig, context: &str) -> Result<()> {
    if kubeconfig.contexts.iter().any(|c| c.name == context) {
        Ok(())
    } else {
        Err(Error::ConfigError(format!(
            "context '{}' does not exist in the kubeconfig",
            context
        )))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_deployments(&self) -> Result<Vec<Deployment>, kube::Error> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        debug!("Listed {} deployments", list.items.len());
        Ok(list.items)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(selector = label_selector, "Listed {} pods", list.items.len());
        Ok(list.items)
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, kube::Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Deployment, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
    }
}
