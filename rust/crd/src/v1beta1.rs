use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition,
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
};

use crate::{
    util, DesiredCuration, HookSet, Hooks, Operation, UpgradeHooks,
    ALLOW_NOT_RECOMMENDED_VERSIONS_ANNOTATION, CLUSTERVERSION_BACKOFF_LIMIT_ANNOTATION,
    DEFAULT_MONITOR_ATTEMPTS, DEFAULT_UPGRADE_TIMEOUT_MINUTES,
};

/// Seconds between two polls of a provisioner while counting monitor attempts.
const MONITOR_ATTEMPT_SECONDS: u32 = 5;

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1beta1",
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
    /// The curation to run: `install`, `upgrade`, `scale`, `destroy`, `detach` or
    /// `delete-cluster-namespace`. Empty means nothing to do.
    #[serde(default)]
    pub desired_curation: DesiredCuration,

    /// `<namespace>/<name>` of the cloud provider credential Secret.
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

    /// Name of the pipeline Job currently running for this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curating_job: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ClusterCurator {
    /// The managed cluster this record curates.
    ///
    /// Classic records are named after their namespace; hosted records share a
    /// hosting namespace, so the record name is always the cluster name.
    pub fn cluster_name(&self) -> String {
        self.name_any()
    }

    /// `curatingJob` set and non-empty.
    pub fn curating_job(&self) -> Option<&str> {
        self.spec
            .curating_job
            .as_deref()
            .filter(|job| !job.is_empty())
    }

    pub fn retry_posthook(&self) -> Option<&str> {
        self.spec
            .operation
            .as_ref()
            .and_then(|op| op.retry_posthook.as_deref())
            .filter(|value| !value.is_empty())
    }

    /// Only the post-hooks of the desired curation should run.
    pub fn is_posthook_only(&self) -> bool {
        self.retry_posthook().is_some()
    }

    /// Whether the record's name differs from its namespace, the hosted-cluster shape.
    pub fn is_hosted_shape(&self) -> bool {
        self.metadata.namespace.as_deref() != Some(self.name_any().as_str())
    }

    pub fn hooks_for(&self, curation: DesiredCuration) -> HookSet<'_> {
        let hooks = match curation {
            DesiredCuration::Install => self.spec.install.as_ref().map(HookSet::from),
            DesiredCuration::Scale => self.spec.scale.as_ref().map(HookSet::from),
            DesiredCuration::Destroy => self.spec.destroy.as_ref().map(HookSet::from),
            DesiredCuration::Upgrade => self.spec.upgrade.as_ref().map(HookSet::from),
            DesiredCuration::Idle
            | DesiredCuration::Detach
            | DesiredCuration::DeleteClusterNamespace => None,
        };
        hooks.unwrap_or_default()
    }

    /// Poll cap for provisioner monitors, derived from the curation's `monitorTimeout`.
    pub fn monitor_attempts(&self, curation: DesiredCuration) -> u32 {
        match self.hooks_for(curation).monitor_timeout {
            Some(minutes) if minutes > 0 => u32::try_from(
                u64::from(minutes) * 60 / u64::from(MONITOR_ATTEMPT_SECONDS),
            )
            .unwrap_or(u32::MAX),
            _ => DEFAULT_MONITOR_ATTEMPTS,
        }
    }

    pub fn upgrade_timeout(&self) -> Duration {
        let minutes = self
            .spec
            .upgrade
            .as_ref()
            .and_then(|upgrade| upgrade.monitor_timeout)
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_UPGRADE_TIMEOUT_MINUTES);
        Duration::from_secs(u64::from(minutes) * 60)
    }

    pub fn allows_not_recommended_versions(&self) -> bool {
        self.annotations()
            .get(ALLOW_NOT_RECOMMENDED_VERSIONS_ANNOTATION)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    pub fn clusterversion_backoff_limit(&self) -> u32 {
        util::clamp_backoff_limit(
            self.annotations()
                .get(CLUSTERVERSION_BACKOFF_LIMIT_ANNOTATION)
                .map(String::as_str),
        )
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{HookType, UpgradeType};

    fn curator(yaml: &str) -> ClusterCurator {
        serde_yaml::from_str(yaml).expect("invalid test input")
    }

    #[test]
    fn parses_install_request() {
        let cc = curator(indoc! {"
            apiVersion: cluster.open-cluster-management.io/v1beta1
            kind: ClusterCurator
            metadata:
              name: c1
              namespace: c1
            spec:
              desiredCuration: install
              providerCredentialPath: default/aws-creds
              install:
                prehook:
                  - name: p1
                    type: AnsibleJob
                    extraVars:
                      size: 3
        "});
        assert_eq!(cc.spec.desired_curation, DesiredCuration::Install);
        assert_eq!(cc.cluster_name(), "c1");
        assert!(!cc.is_hosted_shape());
        assert_eq!(cc.curating_job(), None);
        let hooks = cc.hooks_for(DesiredCuration::Install);
        assert_eq!(hooks.prehook.len(), 1);
        assert_eq!(hooks.prehook[0].hook_type, HookType::AnsibleJob);
        assert!(hooks.posthook.is_empty());
        assert_eq!(cc.monitor_attempts(DesiredCuration::Install), 120);
    }

    #[test]
    fn parses_upgrade_request() {
        let cc = curator(indoc! {"
            apiVersion: cluster.open-cluster-management.io/v1beta1
            kind: ClusterCurator
            metadata:
              name: hc1
              namespace: clusters
              annotations:
                cluster.open-cluster-management.io/upgrade-allow-not-recommended-versions: 'true'
                cluster.open-cluster-management.io/upgrade-clusterversion-backoff-limit: '101'
            spec:
              desiredCuration: upgrade
              curatingJob: ''
              upgrade:
                desiredUpdate: 4.14.0
                channel: fast-4.14
                upgradeType: NodePools
                monitorTimeout: 30
              operation:
                retryPosthook: ''
        "});
        let upgrade = cc.spec.upgrade.as_ref().unwrap();
        assert_eq!(upgrade.upgrade_type, UpgradeType::NodePools);
        assert!(cc.is_hosted_shape());
        assert!(cc.allows_not_recommended_versions());
        assert_eq!(cc.clusterversion_backoff_limit(), 100);
        assert_eq!(cc.upgrade_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(cc.curating_job(), None);
        assert!(!cc.is_posthook_only());
    }

    #[test]
    fn install_monitor_timeout_sets_attempts() {
        let mut cc = ClusterCurator::new("c1", ClusterCuratorSpec::default());
        cc.spec.install = Some(Hooks {
            monitor_timeout: Some(60),
            ..Hooks::default()
        });
        assert_eq!(cc.monitor_attempts(DesiredCuration::Install), 720);
        assert_eq!(cc.monitor_attempts(DesiredCuration::Destroy), 120);
        assert_eq!(cc.upgrade_timeout(), Duration::from_secs(120 * 60));
    }

    #[test]
    fn huge_monitor_timeout_saturates_attempts() {
        let mut cc = ClusterCurator::new("c1", ClusterCuratorSpec::default());
        for (minutes, expected) in [(71_582_789, 858_993_468), (u32::MAX, u32::MAX)] {
            cc.spec.install = Some(Hooks {
                monitor_timeout: Some(minutes),
                ..Hooks::default()
            });
            assert_eq!(cc.monitor_attempts(DesiredCuration::Install), expected);
        }
    }
}
