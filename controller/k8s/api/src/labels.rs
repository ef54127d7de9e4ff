//! Well-known labels and label selectors.

use crate::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

/// Links an EndpointSlice to the Service it belongs to.
pub const SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Set on data-plane Services and Deployments managed for a Gateway.
pub const OWNING_GATEWAY_NAME: &str = "gateway.switchyard.io/owning-gateway-name";

/// Set on data-plane Services and Deployments managed for a Gateway.
pub const OWNING_GATEWAY_NAMESPACE: &str = "gateway.switchyard.io/owning-gateway-namespace";

/// Selects resources managed by this control plane.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const MANAGED_BY_VALUE: &str = "switchyard";

pub type Map = BTreeMap<String, String>;

/// A label selector, as used by listener `allowedRoutes` and the namespace
/// scope of the controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Vec<Expression>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid label selector operator: {0}")]
pub struct InvalidOperator(String);

// === impl Selector ===

impl Selector {
    pub fn from_map(match_labels: Map) -> Self {
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }

    pub fn matches(&self, labels: &Map) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|e| e.matches(labels))
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = InvalidOperator;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(|req| {
                let operator = match req.operator.as_str() {
                    "In" => Operator::In,
                    "NotIn" => Operator::NotIn,
                    "Exists" => Operator::Exists,
                    "DoesNotExist" => Operator::DoesNotExist,
                    op => return Err(InvalidOperator(op.to_string())),
                };
                Ok(Expression {
                    key: req.key.clone(),
                    operator,
                    values: req.values.iter().flatten().cloned().collect(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            match_labels: selector.match_labels.clone().unwrap_or_default(),
            match_expressions,
        })
    }
}

impl std::str::FromStr for Selector {
    type Err = InvalidOperator;

    /// Parses `key=value` pairs separated by commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|kv| !kv.trim().is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) => Ok((k.trim().to_string(), v.trim().to_string())),
                None => Err(InvalidOperator(kv.to_string())),
            })
            .collect::<Result<Map, _>>()
            .map(Self::from_map)
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// === impl Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels.get(&self.key).is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels.get(&self.key).is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}
