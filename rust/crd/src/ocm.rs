//! Open Cluster Management kinds: the hub's record of a managed cluster, its
//! reported info, and the view/action pair used to reach into the managed
//! cluster's own API.

use serde::{Deserialize, Serialize};
use stackable_operator::kube::CustomResource;

use crate::conditions::ObservedCondition;

pub const CONDITION_MANAGED_CLUSTER_AVAILABLE: &str = "ManagedClusterConditionAvailable";
pub const CONDITION_COMPLETED: &str = "Completed";
pub const REASON_UPDATE_RESOURCE_FAILED: &str = "UpdateResourceFailed";

pub const KUBE_VENDOR_OPENSHIFT: &str = "OpenShift";

pub const ACTION_TYPE_UPDATE: &str = "Update";
pub const CLUSTERVERSION_RESOURCE: &str = "clusterversions";
pub const CLUSTERVERSION_NAME: &str = "version";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    status = "ManagedClusterStatus",
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    #[serde(default)]
    pub hub_accepts_client: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ManagedClusterStatus {
    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,
}

impl ManagedCluster {
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| {
                crate::conditions::find_observed(&s.conditions, CONDITION_MANAGED_CLUSTER_AVAILABLE)
            })
            .is_some_and(ObservedCondition::is_true)
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "internal.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterInfo",
    plural = "managedclusterinfos",
    status = "ManagedClusterInfoStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterInfoSpec {}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterInfoStatus {
    #[serde(default)]
    pub kube_vendor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_info: Option<DistributionInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DistributionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocp: Option<OcpDistributionInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcpDistributionInfo {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub available_updates: Vec<String>,

    #[serde(default)]
    pub channel: String,
}

impl ManagedClusterInfo {
    pub fn kube_vendor(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.kube_vendor.as_str())
            .unwrap_or_default()
    }

    fn ocp(&self) -> Option<&OcpDistributionInfo> {
        self.status
            .as_ref()
            .and_then(|s| s.distribution_info.as_ref())
            .and_then(|d| d.ocp.as_ref())
    }

    pub fn ocp_version(&self) -> Option<&str> {
        self.ocp()
            .map(|ocp| ocp.version.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn available_updates(&self) -> &[String] {
        self.ocp()
            .map(|ocp| ocp.available_updates.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "view.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterView",
    plural = "managedclusterviews",
    status = "ManagedClusterViewStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
pub struct ManagedClusterViewSpec {
    pub scope: ViewScope,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ViewScope {
    /// The cluster-wide `ClusterVersion` object of an OpenShift cluster.
    pub fn cluster_version() -> Self {
        Self {
            group: Some("config.openshift.io".to_string()),
            version: Some("v1".to_string()),
            kind: Some("ClusterVersion".to_string()),
            resource: None,
            name: CLUSTERVERSION_NAME.to_string(),
            namespace: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ManagedClusterViewStatus {
    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,

    /// The viewed object as the managed cluster returned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ManagedClusterView {
    /// The viewed object, once the managed cluster has reported it.
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.status
            .as_ref()
            .and_then(|s| s.result.as_ref())
            .filter(|result| result.as_object().is_some_and(|o| !o.is_empty()))
    }
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "action.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterAction",
    plural = "managedclusteractions",
    status = "ManagedClusterActionStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterActionSpec {
    pub action_type: String,

    pub kube: KubeWorkSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct KubeWorkSpec {
    pub resource: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// The full object written to the managed cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ManagedClusterActionStatus {
    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,
}

impl ManagedClusterAction {
    pub fn completed(&self) -> Option<&ObservedCondition> {
        self.status.as_ref().and_then(|s| {
            crate::conditions::find_observed(&s.conditions, CONDITION_COMPLETED)
        })
    }
}
