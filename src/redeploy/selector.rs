//! Label selector resolution
//!
//! Converts a Deployment's structured `LabelSelector` into the textual query
//! accepted by the `labelSelector` list parameter, e.g.
//! `app=db,tier in (primary,replica),!canary`.
//!
//! Requirements are emitted sorted by key and set values are sorted and
//! de-duplicated, so the same selector always resolves to the same string.

use std::collections::BTreeSet;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Selector with no requirements would match every pod in the cluster
    #[error("selector is empty")]
    Empty,

    #[error("requirement has an empty key")]
    EmptyKey,

    #[error("unknown operator '{operator}' for key '{key}'")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator} for key '{key}' requires at least one value")]
    MissingValues { key: String, operator: &'static str },

    #[error("operator {operator} for key '{key}' does not take values")]
    UnexpectedValues { key: String, operator: &'static str },
}

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn key(&self) -> &str {
        match self {
            Requirement::Equals(key, _)
            | Requirement::In(key, _)
            | Requirement::NotIn(key, _)
            | Requirement::Exists(key)
            | Requirement::DoesNotExist(key) => key,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{}={}", key, value),
            Requirement::In(key, values) => write!(f, "{} in ({})", key, join(values)),
            Requirement::NotIn(key, values) => write!(f, "{} notin ({})", key, join(values)),
            Requirement::Exists(key) => write!(f, "{}", key),
            Requirement::DoesNotExist(key) => write!(f, "!{}", key),
        }
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// A resolved pod query: every requirement must hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelQuery {
    requirements: Vec<Requirement>,
}

impl LabelQuery {
    fn new(mut requirements: Vec<Requirement>) -> Result<Self, SelectorError> {
        if requirements.is_empty() {
            return Err(SelectorError::Empty);
        }
        if requirements.iter().any(|r| r.key().is_empty()) {
            return Err(SelectorError::EmptyKey);
        }
        requirements.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(Self { requirements })
    }
}

impl TryFrom<&LabelSelector> for LabelQuery {
    type Error = SelectorError;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            requirements.push(Requirement::Equals(key.clone(), value.clone()));
        }

        for expr in selector.match_expressions.iter().flatten() {
            let key = expr.key.clone();
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        key,
                        operator: if expr.operator == "In" { "In" } else { "NotIn" },
                    })
                }
                "In" => Requirement::In(key, values),
                "NotIn" => Requirement::NotIn(key, values),
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        key,
                        operator: if expr.operator == "Exists" {
                            "Exists"
                        } else {
                            "DoesNotExist"
                        },
                    })
                }
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                other => {
                    return Err(SelectorError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    })
                }
            };
            requirements.push(requirement);
        }

        Self::new(requirements)
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        write!(f, "{}", terms.join(","))
    }
}
