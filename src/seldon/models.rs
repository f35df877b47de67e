/// SeldonDeployment custom resource models
use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::convergence::ObservedState;

/// Desired state of a seldon deployment
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "machinelearning.seldon.io",
    version = "v1",
    kind = "SeldonDeployment",
    plural = "seldondeployments",
    shortname = "sdep",
    status = "SeldonDeploymentStatus",
    derive = "PartialEq",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SeldonDeploymentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub predictors: Vec<PredictorSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Fields without a typed counterpart, kept so updates write them back unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A single predictor: inference graph plus the pods serving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    pub name: String,

    pub graph: PredictiveUnit,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_specs: Vec<SeldonPodSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<i32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Node of the inference graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveUnit {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PredictiveUnit>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<PredictiveUnitType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictiveUnitType {
    UnknownType,
    Router,
    Combiner,
    Model,
    Transformer,
    OutputTransformer,
}

/// Service endpoint of a graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub endpoint_type: Option<EndpointType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointType {
    Rest,
    Grpc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub parameter_type: String,
}

/// Pod template for the containers of a predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeldonPodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    pub spec: PodSpec,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Observed state reported by the seldon operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeldonDeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StatusState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Per-predictor deployment status keyed by the underlying Deployment name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment_status: BTreeMap<String, DeploymentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusState {
    Creating,
    Available,
    Failed,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusState::Creating => "Creating",
            StatusState::Available => "Available",
            StatusState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub available_replicas: i32,
}

impl SeldonDeployment {
    /// Aggregate state, if the operator has reported one
    pub fn state(&self) -> Option<StatusState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn is_available(&self) -> bool {
        self.state() == Some(StatusState::Available)
    }

    /// Sum of available replicas across every deployment status entry
    pub fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .map(|s| {
                s.deployment_status
                    .values()
                    .fold(0, |acc: i32, d| acc.saturating_add(d.available_replicas))
            })
            .unwrap_or(0)
    }

    /// Point the first predictor at a new replica count
    pub fn set_replicas(&mut self, replicas: i32) -> Option<()> {
        let predictor = self.spec.predictors.first_mut()?;
        predictor.replicas = Some(replicas);
        Some(())
    }
}

impl ObservedState for SeldonDeployment {
    fn state_summary(&self) -> String {
        match self.state() {
            Some(state) => format!("{}, {} ready replicas", state, self.ready_replicas()),
            None => "Unknown".to_string(),
        }
    }
}

/// Predicate satisfied once the deployment is Available with exactly `desired` ready replicas.
///
/// Equality is strict: a transient overshoot does not count as converged.
pub fn has_ready_replicas(desired: i32) -> impl Fn(&SeldonDeployment) -> bool {
    move |dpl| dpl.is_available() && dpl.ready_replicas() == desired
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A deployment carrying the given aggregate state and per-group ready counts
    pub fn observed(name: &str, state: Option<StatusState>, ready: &[i32]) -> SeldonDeployment {
        let mut dpl = SeldonDeployment::new(
            name,
            SeldonDeploymentSpec {
                name: "test-deployment".to_string(),
                predictors: vec![],
                protocol: None,
                annotations: BTreeMap::new(),
                extra: BTreeMap::new(),
            },
        );
        dpl.metadata.namespace = Some("default".to_string());
        dpl.status = Some(SeldonDeploymentStatus {
            state,
            description: None,
            deployment_status: ready
                .iter()
                .enumerate()
                .map(|(i, count)| {
                    (
                        format!("{}-example-{}", name, i),
                        DeploymentStatus {
                            replicas: *count,
                            available_replicas: *count,
                            ..DeploymentStatus::default()
                        },
                    )
                })
                .collect(),
            replicas: None,
        });
        dpl
    }
}
