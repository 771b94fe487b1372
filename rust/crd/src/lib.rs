//! Custom resources owned and observed by the cluster curator.
//!
//! [`v1beta1::ClusterCurator`] is the record the controller reconciles; the
//! remaining modules hold partial, read-mostly views of the kinds owned by
//! other operators (Hive, Hypershift, the Ansible resource operator and Open
//! Cluster Management).

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    kube::{
        core::crd::{merge_crds, MergeError},
        CustomResourceExt,
    },
    schemars::{self, JsonSchema},
    utils::crds::raw_object_schema,
};
use strum::{Display, EnumString, IntoStaticStr};

pub mod ansible;
pub mod conditions;
pub mod hive;
pub mod hypershift;
pub mod ocm;
pub mod util;
pub mod v1alpha1;
pub mod v1beta1;

pub const APP_NAME: &str = "cluster-curator";
pub const OPERATOR_NAME: &str = "cluster.open-cluster-management.io";
pub const FIELD_MANAGER: &str = "cluster-curator-controller";

/// Disables the `availableUpdates` membership check and switches the upgrade to forced mode.
pub const ALLOW_NOT_RECOMMENDED_VERSIONS_ANNOTATION: &str =
    "cluster.open-cluster-management.io/upgrade-allow-not-recommended-versions";
/// Retry budget for the remote `ClusterVersion` update, clamped to `[1, 100]`.
pub const CLUSTERVERSION_BACKOFF_LIMIT_ANNOTATION: &str =
    "cluster.open-cluster-management.io/upgrade-clusterversion-backoff-limit";

/// Service account every pipeline container runs as.
pub const WORKER_SERVICE_ACCOUNT: &str = "cluster-installer";
/// Name of both the Role and the RoleBinding granted to [`WORKER_SERVICE_ACCOUNT`].
pub const WORKER_ROLE: &str = "curator";
/// Secret holding the Ansible Tower host and token.
pub const TOWER_ACCESS_SECRET: &str = "toweraccess";

pub const DEFAULT_MONITOR_ATTEMPTS: u32 = 120;
pub const DEFAULT_UPGRADE_TIMEOUT_MINUTES: u32 = 120;

/// Returns the merged CRD serving both API versions, with `v1beta1` as the storage version.
pub fn merged_crd() -> Result<CustomResourceDefinition, MergeError> {
    merge_crds(
        vec![v1alpha1::ClusterCurator::crd(), v1beta1::ClusterCurator::crd()],
        "v1beta1",
    )
}

/// The lifecycle operation a [`v1beta1::ClusterCurator`] asks for.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DesiredCuration {
    /// No curation requested.
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Idle,
    Install,
    Upgrade,
    Scale,
    Destroy,
    Detach,
    DeleteClusterNamespace,
}

impl DesiredCuration {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Name of the Ansible Tower job or workflow template.
    pub name: String,

    #[serde(default, rename = "type")]
    pub hook_type: HookType,

    /// Variables handed to the template, passed through unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub extra_vars: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum HookType {
    #[default]
    Job,
    Workflow,
    AnsibleJob,
    #[serde(rename = "Ansible-default")]
    #[strum(serialize = "Ansible-default")]
    AnsibleDefault,
}

impl HookType {
    pub fn is_workflow(&self) -> bool {
        matches!(self, Self::Workflow)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehook: Vec<Hook>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthook: Vec<Hook>,

    /// A complete Job template that replaces the rendered curation pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub override_job: Option<serde_json::Value>,

    /// Minutes to wait for the provisioner before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_timeout: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
pub enum UpgradeType {
    ControlPlane,
    NodePools,
    #[default]
    All,
}

impl UpgradeType {
    pub fn includes_control_plane(&self) -> bool {
        matches!(self, Self::ControlPlane | Self::All)
    }

    pub fn includes_node_pools(&self) -> bool {
        matches!(self, Self::NodePools | Self::All)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHooks {
    /// The OpenShift version to move to, e.g. `4.14.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_update: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Which parts of a hosted cluster are moved to the new release.
    #[serde(default)]
    pub upgrade_type: UpgradeType,

    /// Minutes to wait for the upgrade to finish, defaults to 120.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_timeout: Option<u32>,

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
pub struct Operation {
    /// Any non-empty value re-runs the post-hooks of the desired curation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_posthook: Option<String>,
}

/// The hook configuration of one curation, borrowed from the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct HookSet<'a> {
    pub prehook: &'a [Hook],
    pub posthook: &'a [Hook],
    pub override_job: Option<&'a serde_json::Value>,
    pub monitor_timeout: Option<u32>,
}

impl<'a> From<&'a Hooks> for HookSet<'a> {
    fn from(hooks: &'a Hooks) -> Self {
        Self {
            prehook: &hooks.prehook,
            posthook: &hooks.posthook,
            override_job: hooks.override_job.as_ref(),
            monitor_timeout: hooks.monitor_timeout,
        }
    }
}

impl<'a> From<&'a UpgradeHooks> for HookSet<'a> {
    fn from(hooks: &'a UpgradeHooks) -> Self {
        Self {
            prehook: &hooks.prehook,
            posthook: &hooks.posthook,
            override_job: hooks.override_job.as_ref(),
            monitor_timeout: hooks.monitor_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", DesiredCuration::Idle)]
    #[case("install", DesiredCuration::Install)]
    #[case("upgrade", DesiredCuration::Upgrade)]
    #[case("scale", DesiredCuration::Scale)]
    #[case("destroy", DesiredCuration::Destroy)]
    #[case("detach", DesiredCuration::Detach)]
    #[case("delete-cluster-namespace", DesiredCuration::DeleteClusterNamespace)]
    fn desired_curation_wire_names(#[case] wire: &str, #[case] expected: DesiredCuration) {
        assert_eq!(DesiredCuration::from_str(wire).unwrap(), expected);
        let parsed: DesiredCuration = serde_json::from_value(serde_json::json!(wire)).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(expected.to_string(), wire);
    }

    #[test]
    fn hook_type_defaults_to_job() {
        let hook: Hook = serde_yaml::from_str("name: p1").unwrap();
        assert_eq!(hook.hook_type, HookType::Job);
        assert!(!hook.hook_type.is_workflow());

        let hook: Hook = serde_yaml::from_str("name: wf\ntype: Workflow").unwrap();
        assert!(hook.hook_type.is_workflow());

        let hook: Hook = serde_yaml::from_str("name: d\ntype: Ansible-default").unwrap();
        assert_eq!(hook.hook_type, HookType::AnsibleDefault);
    }

    #[test]
    fn merged_crd_serves_both_versions() {
        let crd = merged_crd().expect("versions must merge");
        let versions = crd
            .spec
            .versions
            .iter()
            .map(|v| (v.name.as_str(), v.storage))
            .collect::<Vec<_>>();
        assert_eq!(versions, vec![("v1alpha1", false), ("v1beta1", true)]);
    }
}
