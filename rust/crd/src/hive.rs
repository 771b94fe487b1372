//! Partial view of Hive's `ClusterDeployment`.

use serde::{Deserialize, Serialize};
use stackable_operator::kube::CustomResource;

use crate::conditions::ObservedCondition;

/// Set to `"true"` when the ClusterDeployment is created, removed by activation.
pub const RECONCILE_PAUSE_ANNOTATION: &str = "hive.openshift.io/reconcile-pause";

pub const CONDITION_PROVISION_STOPPED: &str = "ProvisionStopped";
pub const CONDITION_REQUIREMENTS_MET: &str = "RequirementsMet";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    plural = "clusterdeployments",
    status = "ClusterDeploymentStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub base_domain: String,

    #[serde(default)]
    pub installed: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentStatus {
    #[serde(rename = "webConsoleURL", default, skip_serializing_if = "Option::is_none")]
    pub web_console_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_ref: Option<ProvisionRef>,

    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProvisionRef {
    #[serde(default)]
    pub name: String,
}

impl ClusterDeployment {
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(RECONCILE_PAUSE_ANNOTATION))
    }

    pub fn web_console_url(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.web_console_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    /// Name of the `ClusterProvision` currently installing the cluster.
    pub fn provision_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.provision_ref.as_ref())
            .map(|r| r.name.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn observed_conditions(&self) -> &[ObservedCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

/// The install Job Hive spawns for a `ClusterProvision`.
pub fn provision_job_name(provision: &str) -> String {
    format!("{provision}-provision")
}

/// The uninstall Job Hive spawns once a ClusterDeployment is deleted.
pub fn uninstall_job_name(cluster: &str) -> String {
    format!("{cluster}-destroying")
}
