//! The `AnsibleJob` kind of the Ansible Tower resource operator.

use serde::{Deserialize, Serialize};
use stackable_operator::kube::CustomResource;

use crate::conditions::ObservedCondition;

pub const RESULT_SUCCESSFUL: &str = "successful";
pub const RESULT_ERROR: &str = "error";
pub const REASON_FAILED: &str = "Failed";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "tower.ansible.com",
    version = "v1alpha1",
    kind = "AnsibleJob",
    plural = "ansiblejobs",
    status = "AnsibleJobStatus",
    namespaced,
    schema = "disabled",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi"
    )
)]
pub struct AnsibleJobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_template_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_template_name: Option<String>,

    /// Secret with the Tower `host` and `token`.
    pub tower_auth_secret: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsibleJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_job_result: Option<AnsibleJobResult>,

    /// Absent until the resource operator has looked at the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ObservedCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_job: Option<K8sJob>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AnsibleJobResult {
    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sJob {
    /// `<namespace>/<name>` of the Kubernetes Job running the playbook.
    #[serde(default)]
    pub namespaced_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
