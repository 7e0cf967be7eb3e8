//! In-memory cluster and clocks for redeploy tests

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::core::ErrorResponse;
use kube::ResourceExt;
use serde_json::Value;

use super::Clock;
use crate::cluster::ClusterApi;

/// A patch call as the cluster received it
#[derive(Clone, Debug, PartialEq)]
pub struct PatchCall {
    pub namespace: String,
    pub name: String,
    pub patch: Value,
}

#[derive(Default)]
pub struct FakeCluster {
    deployments: Vec<Deployment>,
    pods: Vec<Pod>,
    replica_sets: Vec<ReplicaSet>,
    fail_deployment_list: bool,
    failing_selectors: HashSet<String>,
    failing_patches: HashSet<String>,
    pod_queries: Mutex<Vec<String>>,
    patches: Mutex<Vec<PatchCall>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployments.push(deployment);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn with_replica_set(mut self, replica_set: ReplicaSet) -> Self {
        self.replica_sets.push(replica_set);
        self
    }

    pub fn fail_deployment_list(mut self) -> Self {
        self.fail_deployment_list = true;
        self
    }

    /// Make pod listing fail for this selector query
    pub fn fail_pod_list(mut self, selector: &str) -> Self {
        self.failing_selectors.insert(selector.to_string());
        self
    }

    /// Make patching fail for this Deployment name
    pub fn fail_patch(mut self, name: &str) -> Self {
        self.failing_patches.insert(name.to_string());
        self
    }

    pub fn patches(&self) -> Vec<PatchCall> {
        self.patches.lock().unwrap().clone()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn pod_queries(&self) -> Vec<String> {
        self.pod_queries.lock().unwrap().clone()
    }
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_deployments(&self) -> Result<Vec<Deployment>, kube::Error> {
        if self.fail_deployment_list {
            return Err(api_error(
                403,
                "Forbidden",
                "deployments.apps is forbidden".to_string(),
            ));
        }
        Ok(self.deployments.clone())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, kube::Error> {
        self.pod_queries
            .lock()
            .unwrap()
            .push(label_selector.to_string());
        if self.failing_selectors.contains(label_selector) {
            return Err(api_error(
                500,
                "InternalError",
                format!("etcd timeout listing pods for {}", label_selector),
            ));
        }
        let query: SelectorQuery = label_selector.parse().map_err(|term| {
            api_error(
                400,
                "BadRequest",
                format!("unable to parse requirement: {}", term),
            )
        })?;
        Ok(self
            .pods
            .iter()
            .filter(|p| query.matches(p.labels()))
            .cloned()
            .collect())
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, kube::Error> {
        Ok(self
            .replica_sets
            .iter()
            .filter(|rs| rs.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Deployment, kube::Error> {
        self.patches.lock().unwrap().push(PatchCall {
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        });
        if self.failing_patches.contains(name) {
            return Err(api_error(
                422,
                "Invalid",
                format!("deployment {} rejected the patch", name),
            ));
        }
        self.deployments
            .iter()
            .find(|d| d.name_any() == name && d.namespace().as_deref() == Some(namespace))
            .cloned()
            .ok_or_else(|| {
                api_error(
                    404,
                    "NotFound",
                    format!("deployments.apps \"{}\" not found", name),
                )
            })
    }
}

/// Label query as the API server evaluates a `labelSelector` string
#[derive(Debug)]
pub struct SelectorQuery {
    terms: Vec<Term>,
}

#[derive(Debug)]
enum Term {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl SelectorQuery {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|term| match term {
            Term::Equals(key, value) => labels.get(key) == Some(value),
            Term::NotEquals(key, value) => labels.get(key) != Some(value),
            Term::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Term::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Term::Exists(key) => labels.contains_key(key),
            Term::DoesNotExist(key) => !labels.contains_key(key),
        })
    }
}

impl FromStr for SelectorQuery {
    /// The offending term
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let terms = split_terms(s)
            .into_iter()
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { terms })
    }
}

/// Split on commas that are not inside a value set
fn split_terms(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(s[start..].trim());
    terms.retain(|t| !t.is_empty());
    terms
}

fn parse_term(term: &str) -> Result<Term, String> {
    let owned = |k: &str| k.trim().to_string();
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Term::DoesNotExist(owned(key)));
    }
    if let Some((key, rest)) = term.split_once(" notin ") {
        return Ok(Term::NotIn(owned(key), parse_set(term, rest)?));
    }
    if let Some((key, rest)) = term.split_once(" in ") {
        return Ok(Term::In(owned(key), parse_set(term, rest)?));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Term::NotEquals(owned(key), owned(value)));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Term::Equals(owned(key), owned(value)));
    }
    if term.contains(char::is_whitespace) || term.contains(['(', ')']) {
        return Err(term.to_string());
    }
    Ok(Term::Exists(term.to_string()))
}

fn parse_set(term: &str, rest: &str) -> Result<BTreeSet<String>, String> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| term.to_string())?;
    Ok(inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect())
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn deployment_uid(namespace: &str, name: &str) -> String {
    format!("uid-{}-{}", namespace, name)
}

/// Deployment selecting pods by `match_labels`
pub fn deployment(namespace: &str, name: &str, selector: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(deployment_uid(namespace, name)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels(selector)),
                match_expressions: None,
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn pod(namespace: &str, name: &str, pod_labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pod_labels)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn owner(kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        ..Default::default()
    }
}

/// Pod controlled by the named ReplicaSet
pub fn owned_pod(
    namespace: &str,
    name: &str,
    pod_labels: &[(&str, &str)],
    replica_set: &str,
) -> Pod {
    let mut pod = pod(namespace, name, pod_labels);
    pod.metadata.owner_references = Some(vec![owner(
        "ReplicaSet",
        replica_set,
        &format!("uid-{}-{}", namespace, replica_set),
    )]);
    pod
}

/// ReplicaSet controlled by the named Deployment
pub fn replica_set(namespace: &str, name: &str, deployment: &str) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}-{}", namespace, name)),
            owner_references: Some(vec![owner(
                "Deployment",
                deployment,
                &deployment_uid(namespace, deployment),
            )]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Clock that always reports the same instant
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Clock that advances one second on every reading
pub struct StepClock {
    next: AtomicI64,
}

impl StepClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            next: AtomicI64::new(start.timestamp()),
        }
    }
}

impl Default for StepClock {
    fn default() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.next.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_terms_match_absent_keys() {
        let query: SelectorQuery = "app=db,env notin (dev),!canary".parse().unwrap();
        assert!(query.matches(&labels(&[("app", "db")])));
        assert!(query.matches(&labels(&[("app", "db"), ("env", "prod")])));
        assert!(!query.matches(&labels(&[("app", "db"), ("env", "dev")])));
        assert!(!query.matches(&labels(&[("app", "db"), ("canary", "true")])));
    }

    #[test]
    fn test_malformed_set_is_rejected() {
        let err = "tier in primary".parse::<SelectorQuery>().unwrap_err();
        assert_eq!(err, "tier in primary");
    }
}
