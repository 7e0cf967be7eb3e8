//! Redeploy orchestration
//!
//! A run discovers the matching Deployments, then restarts each one by
//! patching its pod template, and returns a [`RedeployReport`]. The run is
//! all-or-nothing: the first failure aborts it and no partial report is
//! returned. Patches that already landed are not undone.

pub mod applier;
pub mod discovery;
pub mod ownership;
pub mod report;
pub mod selector;

#[cfg(test)]
mod fake;

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::info;

use crate::cluster::ClusterApi;
use crate::error::Result;

pub use applier::{format_timestamp, redeploy_one, restart_patch, RESTART_ANNOTATION};
pub use discovery::{discover, name_matches, MatchedDeployment, DEFAULT_NAME_FILTER};
pub use report::{DeploymentOutcome, FlatSummary, PodOutcome, RedeployReport};
pub use selector::{LabelQuery, SelectorError};

/// Source of the restart timestamp
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never returns the same instant twice
#[derive(Debug, Default)]
pub struct SystemClock {
    last_nanos: AtomicI64,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
        let previous = self
            .last_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Utc.timestamp_nanos(wall.max(previous + 1))
    }
}

/// Knobs for a single run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedeployOptions {
    /// Substring a Deployment name must contain
    pub name_filter: String,
    /// Deployments restarted at once; 1 means strictly sequential
    pub concurrency: usize,
    /// Only count pods whose owner chain leads back to the Deployment
    pub verify_ownership: bool,
}

impl Default for RedeployOptions {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            concurrency: 1,
            verify_ownership: false,
        }
    }
}

pub struct Redeployer<C, K = SystemClock> {
    cluster: C,
    clock: K,
    options: RedeployOptions,
}

impl<C: ClusterApi> Redeployer<C> {
    pub fn new(cluster: C, options: RedeployOptions) -> Self {
        Self::with_clock(cluster, SystemClock::default(), options)
    }
}

impl<C: ClusterApi, K: Clock> Redeployer<C, K> {
    pub fn with_clock(cluster: C, clock: K, options: RedeployOptions) -> Self {
        Self {
            cluster,
            clock,
            options,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Discover, restart and report.
    ///
    /// Outcomes are reported in discovery order regardless of concurrency.
    pub async fn run(&self) -> Result<RedeployReport> {
        let matched = discover(&self.cluster, &self.options.name_filter).await?;
        if matched.is_empty() {
            info!("No deployments to restart");
            return Ok(RedeployReport::new());
        }

        let outcomes: Vec<DeploymentOutcome> = stream::iter(&matched)
            .map(|deployment| {
                redeploy_one(
                    &self.cluster,
                    &self.clock,
                    deployment,
                    self.options.verify_ownership,
                )
            })
            .buffered(self.options.concurrency.max(1))
            .try_collect()
            .await?;

        let report: RedeployReport = outcomes.into_iter().collect();
        info!(
            "Restarted {} deployments covering {} pods",
            report.len(),
            report.pod_count()
        );
        Ok(report)
    }
}

/// Restart every Deployment whose name contains "database", one at a time
pub async fn redeploy_database_deployments<C: ClusterApi>(cluster: C) -> Result<RedeployReport> {
    Redeployer::new(cluster, RedeployOptions::default())
        .run()
        .await
}
