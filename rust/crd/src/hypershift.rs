//! Partial views of Hypershift's `HostedCluster` and `NodePool`.

use serde::{Deserialize, Serialize};
use stackable_operator::kube::CustomResource;

use crate::conditions::ObservedCondition;

pub const CONDITION_DEGRADED: &str = "Degraded";
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_CLUSTER_VERSION_AVAILABLE: &str = "ClusterVersionAvailable";
pub const CONDITION_CLUSTER_VERSION_PROGRESSING: &str = "ClusterVersionProgressing";

/// Platforms whose hosted clusters may be detached from the hub.
pub const DETACHABLE_PLATFORMS: &[&str] = &["KubeVirt", "Agent"];

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedCluster",
    plural = "hostedclusters",
    status = "HostedClusterStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterSpec {
    #[serde(default)]
    pub release: Release,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,

    #[serde(default)]
    pub platform: Platform,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Release {
    #[serde(default)]
    pub image: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Platform {
    #[serde(rename = "type", default)]
    pub type_: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterStatus {
    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ClusterVersionStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterVersionStatus {
    #[serde(default)]
    pub history: Vec<UpdateHistory>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UpdateHistory {
    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub version: String,
}

impl HostedCluster {
    pub fn is_paused(&self) -> bool {
        self.spec.paused_until.is_some()
    }

    pub fn observed_conditions(&self) -> &[ObservedCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// The most recent version the control plane finished rolling out.
    pub fn completed_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .and_then(|v| v.history.iter().find(|h| h.state == "Completed"))
            .map(|h| h.version.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_detachable(&self) -> bool {
        DETACHABLE_PLATFORMS.contains(&self.spec.platform.type_.as_str())
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "NodePool",
    plural = "nodepools",
    status = "NodePoolStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Name of the HostedCluster this pool belongs to.
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub release: Release,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,
}

impl NodePool {
    pub fn is_paused(&self) -> bool {
        self.spec.paused_until.is_some()
    }

    pub fn version(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.version.as_deref())
    }
}
