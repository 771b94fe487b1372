//! The original `ClusterCurator` shape, still served for existing clients.
//!
//! It lacks `upgradeType`, `monitorTimeout` and the `operation` block; objects
//! written through it are stored as `v1beta1` with those fields defaulted.

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition,
    kube::CustomResource,
    schemars::{self, JsonSchema},
    utils::crds::raw_object_schema,
};

use crate::{DesiredCuration, Hook};

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ClusterCurator",
    plural = "clustercurators",
    shortname = "curator",
    status = "ClusterCuratorStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorSpec {
    #[serde(default)]
    pub desired_curation: DesiredCuration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_credential_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Hooks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Hooks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<Hooks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeHooks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curating_job: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehook: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthook: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub override_job: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_update: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehook: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthook: Vec<Hook>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
