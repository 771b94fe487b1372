//! Drives hosted clusters through Hypershift's `HostedCluster` and `NodePool`s.

use std::time::Duration;

use cluster_curator_crd::{
    conditions::{
        find_observed, ObservedCondition, DETACH_CLUSTER, HYPERSHIFT_DESTROYING_JOB,
        HYPERSHIFT_PROVISIONING_JOB, MONITOR_UPGRADE, UPGRADE_CLUSTER,
    },
    hypershift::{
        HostedCluster, NodePool, CONDITION_AVAILABLE, CONDITION_CLUSTER_VERSION_AVAILABLE,
        CONDITION_CLUSTER_VERSION_PROGRESSING, CONDITION_DEGRADED, CONDITION_PROGRESSING,
    },
    ocm::{ManagedCluster, ManagedClusterInfo},
    util, UpgradeType,
};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::kube::{
    self,
    api::{DeleteParams, ListParams, Patch, PatchParams},
    Api, ResourceExt,
};

use crate::{
    error::{Classify, ErrorKind},
    recorder::Recorder,
    retry,
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Conditions that mean the HostedCluster cannot become ready without a spec change.
const BLOCKING_CONDITIONS: &[&str] = &["ValidConfiguration", "ValidReleaseImage"];

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read HostedCluster {namespace}/{name}"))]
    GetHostedCluster {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("HostedCluster {namespace}/{name} not found"))]
    HostedClusterNotFound { namespace: String, name: String },

    #[snafu(display("failed to list NodePools in {namespace}"))]
    ListNodePools { source: kube::Error, namespace: String },

    #[snafu(display("failed to patch {kind} {namespace}/{name}"))]
    Patch {
        source: kube::Error,
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to delete {kind} {name}"))]
    Delete {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },

    #[snafu(display("failed to read ManagedCluster {name}"))]
    GetManagedCluster { source: kube::Error, name: String },

    #[snafu(display("failed to read ManagedClusterInfo {name}"))]
    GetManagedClusterInfo { source: kube::Error, name: String },

    #[snafu(display("no desiredUpdate was provided"))]
    MissingDesiredUpdate,

    #[snafu(display("{version:?} is not a valid version"))]
    InvalidVersion {
        source: semver::Error,
        version: String,
    },

    #[snafu(display("the control plane version of {name} is unknown"))]
    UnknownControlPlaneVersion { name: String },

    #[snafu(display(
        "desired version {desired} is higher than HostedCluster version {control_plane}"
    ))]
    NodePoolsAheadOfControlPlane {
        desired: String,
        control_plane: String,
    },

    #[snafu(display("cluster {name} is already at version {version}"))]
    AlreadyAtVersion { name: String, version: String },

    #[snafu(display("HostedCluster {name} on platform {platform:?} can not be detached"))]
    NotDetachable { name: String, platform: String },

    #[snafu(display("HostedCluster {name} failed: {reason}"))]
    HostedClusterFailed { name: String, reason: String },

    #[snafu(display("Timed out waiting for job {name}"))]
    TimedOut { name: String },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetHostedCluster { source, .. }
            | Error::ListNodePools { source, .. }
            | Error::Patch { source, .. }
            | Error::Delete { source, .. }
            | Error::GetManagedCluster { source, .. }
            | Error::GetManagedClusterInfo { source, .. } => source.kind(),
            Error::HostedClusterNotFound { .. }
            | Error::MissingDesiredUpdate
            | Error::InvalidVersion { .. }
            | Error::UnknownControlPlaneVersion { .. }
            | Error::NodePoolsAheadOfControlPlane { .. }
            | Error::AlreadyAtVersion { .. }
            | Error::NotDetachable { .. } => ErrorKind::Validation,
            Error::HostedClusterFailed { .. } => ErrorKind::RemoteOperator,
            Error::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadinessOutcome {
    Ready,
    StillProgressing(String),
    Failed(String),
}

fn require<'a>(
    conditions: &'a [ObservedCondition],
    type_: &str,
) -> std::result::Result<&'a ObservedCondition, ReadinessOutcome> {
    find_observed(conditions, type_)
        .ok_or_else(|| ReadinessOutcome::StillProgressing(format!("{type_} not reported")))
}

/// Evaluates the HostedCluster conditions.
///
/// `upgrading_to` additionally requires the control plane to have stopped
/// progressing and to report that version as applied.
pub fn readiness(conditions: &[ObservedCondition], upgrading_to: Option<&str>) -> ReadinessOutcome {
    for blocking in BLOCKING_CONDITIONS {
        if let Some(condition) = find_observed(conditions, blocking).filter(|c| c.is_false()) {
            return ReadinessOutcome::Failed(format!("{blocking}: {}", condition.message()));
        }
    }

    let evaluate = || {
        let degraded = require(conditions, CONDITION_DEGRADED)?;
        let available = require(conditions, CONDITION_AVAILABLE)?;
        let cv_available = require(conditions, CONDITION_CLUSTER_VERSION_AVAILABLE)?;
        let cv_progressing = require(conditions, CONDITION_CLUSTER_VERSION_PROGRESSING)?;

        let not_ready = |condition: &ObservedCondition| {
            Err(ReadinessOutcome::StillProgressing(format!(
                "{}={}: {}",
                condition.type_,
                condition.status,
                condition.message()
            )))
        };
        if !degraded.is_false() {
            return not_ready(degraded);
        }
        if !available.is_true() {
            return not_ready(available);
        }
        if !cv_available.is_true() || !cv_available.message().contains("Done applying") {
            return not_ready(cv_available);
        }
        if !cv_progressing.is_false() || !cv_progressing.message().contains("Cluster version is") {
            return not_ready(cv_progressing);
        }
        if let Some(version) = upgrading_to {
            let progressing = require(conditions, CONDITION_PROGRESSING)?;
            if !progressing.is_false() {
                return not_ready(progressing);
            }
            if !cv_available.message().contains(version) {
                return not_ready(cv_available);
            }
        }
        Ok(())
    };

    match evaluate() {
        Ok(()) => ReadinessOutcome::Ready,
        Err(outcome) => outcome,
    }
}

/// What an upgrade request patches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpgradePlan {
    pub image: String,
    pub control_plane: bool,
    pub node_pools: bool,
}

fn parse_version(version: &str) -> Result<semver::Version> {
    semver::Version::parse(version.trim_start_matches('v')).context(InvalidVersionSnafu { version })
}

/// Validates an upgrade of `cluster` to `desired` against the control plane's
/// current version.
pub fn plan_upgrade(
    cluster: &str,
    upgrade_type: UpgradeType,
    desired: &str,
    control_plane_version: Option<&str>,
) -> Result<UpgradePlan> {
    let desired_version = parse_version(desired)?;
    if upgrade_type == UpgradeType::NodePools {
        let current = control_plane_version.context(UnknownControlPlaneVersionSnafu { name: cluster })?;
        if desired_version > parse_version(current)? {
            return NodePoolsAheadOfControlPlaneSnafu {
                desired,
                control_plane: current,
            }
            .fail();
        }
    } else if let Some(current) = control_plane_version {
        if parse_version(current)? == desired_version {
            return AlreadyAtVersionSnafu {
                name: cluster,
                version: current,
            }
            .fail();
        }
    }
    Ok(UpgradePlan {
        image: util::release_image(desired),
        control_plane: upgrade_type.includes_control_plane(),
        node_pools: upgrade_type.includes_node_pools(),
    })
}

pub struct Hypershift {
    client: kube::Client,
    hosted_clusters: Api<HostedCluster>,
    node_pools: Api<NodePool>,
    recorder: Recorder,
    cluster: String,
    namespace: String,
}

impl Hypershift {
    /// `namespace` is the hosting namespace holding the HostedCluster and NodePools.
    pub fn new(client: kube::Client, recorder: Recorder, cluster: &str, namespace: &str) -> Self {
        Self {
            hosted_clusters: Api::namespaced(client.clone(), namespace),
            node_pools: Api::namespaced(client.clone(), namespace),
            client,
            recorder,
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
        }
    }

    async fn get_hosted_cluster(&self) -> Result<Option<HostedCluster>> {
        self.hosted_clusters
            .get_opt(&self.cluster)
            .await
            .context(GetHostedClusterSnafu {
                namespace: &self.namespace,
                name: &self.cluster,
            })
    }

    async fn hosted_cluster(&self) -> Result<HostedCluster> {
        self.get_hosted_cluster()
            .await?
            .context(HostedClusterNotFoundSnafu {
                namespace: &self.namespace,
                name: &self.cluster,
            })
    }

    /// NodePools belonging to this cluster.
    async fn cluster_node_pools(&self) -> Result<Vec<NodePool>> {
        let pools = self
            .node_pools
            .list(&ListParams::default())
            .await
            .context(ListNodePoolsSnafu {
                namespace: &self.namespace,
            })?;
        Ok(pools
            .into_iter()
            .filter(|pool| pool.spec.cluster_name == self.cluster)
            .collect())
    }

    async fn merge_patch<K>(&self, api: &Api<K>, kind: &'static str, name: &str, patch: serde_json::Value) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        retry::on_conflict("patch hosted cluster resource", || async {
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
        })
        .await
        .context(PatchSnafu {
            kind,
            namespace: &self.namespace,
            name,
        })?;
        Ok(())
    }

    /// Clears `pausedUntil` on the HostedCluster and its NodePools.
    pub async fn activate(&self) -> Result<()> {
        let unpause = json!({ "spec": { "pausedUntil": null } });
        let hosted_cluster = self.hosted_cluster().await?;
        if hosted_cluster.is_paused() {
            self.merge_patch(&self.hosted_clusters, "HostedCluster", &self.cluster, unpause.clone())
                .await?;
            tracing::info!(cluster = %self.cluster, "un-paused HostedCluster");
        }
        for pool in self.cluster_node_pools().await? {
            if pool.is_paused() {
                let name = pool.name_any();
                self.merge_patch(&self.node_pools, "NodePool", &name, unpause.clone())
                    .await?;
                tracing::info!(cluster = %self.cluster, node_pool = %name, "un-paused NodePool");
            }
        }
        Ok(())
    }

    pub async fn monitor_install(&self, attempts: u32) -> Result<()> {
        self.wait_until_ready(HYPERSHIFT_PROVISIONING_JOB, None, attempts)
            .await
    }

    async fn wait_until_ready(
        &self,
        condition_type: &str,
        upgrading_to: Option<&str>,
        attempts: u32,
    ) -> Result<()> {
        let mut last_message = String::new();
        for attempt in 1..=attempts {
            let hosted_cluster = self.hosted_cluster().await?;
            match readiness(hosted_cluster.observed_conditions(), upgrading_to) {
                ReadinessOutcome::Ready => {
                    self.recorder
                        .finished(condition_type, format!("HostedCluster {} is ready", self.cluster))
                        .await;
                    return Ok(());
                }
                ReadinessOutcome::Failed(reason) => {
                    self.recorder.failed(condition_type, reason.clone()).await;
                    return HostedClusterFailedSnafu {
                        name: &self.cluster,
                        reason,
                    }
                    .fail();
                }
                ReadinessOutcome::StillProgressing(message) => {
                    tracing::debug!(cluster = %self.cluster, attempt, %message, "HostedCluster not ready");
                    if message != last_message {
                        self.recorder.started(condition_type, message.clone()).await;
                        last_message = message;
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.recorder
            .failed(condition_type, "Timed out waiting for HostedCluster")
            .await;
        TimedOutSnafu {
            name: format!("{}/{}", self.namespace, self.cluster),
        }
        .fail()
    }

    /// Deletes the NodePools, then the HostedCluster.
    pub async fn destroy(&self) -> Result<()> {
        for pool in self.cluster_node_pools().await? {
            let name = pool.name_any();
            delete_ignoring_missing(&self.node_pools, "NodePool", &name).await?;
            tracing::info!(cluster = %self.cluster, node_pool = %name, "deleted NodePool");
        }
        delete_ignoring_missing(&self.hosted_clusters, "HostedCluster", &self.cluster).await?;
        tracing::info!(cluster = %self.cluster, "deleted HostedCluster");
        Ok(())
    }

    pub async fn monitor_destroy(&self, attempts: u32) -> Result<()> {
        for attempt in 1..=attempts {
            if self.get_hosted_cluster().await?.is_none() {
                self.recorder
                    .finished(HYPERSHIFT_DESTROYING_JOB, "HostedCluster removed")
                    .await;
                return Ok(());
            }
            if attempt == 1 {
                self.recorder
                    .started(HYPERSHIFT_DESTROYING_JOB, "waiting for HostedCluster removal")
                    .await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu {
            name: format!("{}/{}", self.namespace, self.cluster),
        }
        .fail()
    }

    /// The version the control plane last finished rolling out, falling back
    /// to what the hub reports for the managed cluster.
    async fn control_plane_version(&self, hosted_cluster: &HostedCluster) -> Result<Option<String>> {
        if let Some(version) = hosted_cluster.completed_version() {
            return Ok(Some(version.to_string()));
        }
        Ok(self
            .managed_cluster_info()
            .await?
            .and_then(|info| info.ocp_version().map(str::to_string)))
    }

    async fn managed_cluster_info(&self) -> Result<Option<ManagedClusterInfo>> {
        Api::<ManagedClusterInfo>::namespaced(self.client.clone(), &self.cluster)
            .get_opt(&self.cluster)
            .await
            .context(GetManagedClusterInfoSnafu {
                name: &self.cluster,
            })
    }

    /// Whether the cluster still has to move to `desired`.
    pub async fn need_to_upgrade(&self, upgrade_type: UpgradeType, desired: &str) -> Result<bool> {
        if upgrade_type == UpgradeType::NodePools {
            return Ok(true);
        }
        let current = self
            .managed_cluster_info()
            .await?
            .and_then(|info| info.ocp_version().map(str::to_string));
        Ok(current.as_deref() != Some(desired))
    }

    pub async fn upgrade(&self, upgrade_type: UpgradeType, desired: Option<&str>) -> Result<()> {
        let desired = desired.filter(|d| !d.is_empty()).context(MissingDesiredUpdateSnafu)?;
        let hosted_cluster = self.hosted_cluster().await?;
        let control_plane_version = self.control_plane_version(&hosted_cluster).await?;
        let plan = match plan_upgrade(
            &self.cluster,
            upgrade_type,
            desired,
            control_plane_version.as_deref(),
        ) {
            Ok(plan) => plan,
            Err(error) => {
                self.recorder.failed(UPGRADE_CLUSTER, error.to_string()).await;
                return Err(error);
            }
        };

        let set_image = json!({ "spec": { "release": { "image": plan.image } } });
        if plan.control_plane {
            self.merge_patch(&self.hosted_clusters, "HostedCluster", &self.cluster, set_image.clone())
                .await?;
            tracing::info!(cluster = %self.cluster, image = %plan.image, "patched HostedCluster release");
        }
        if plan.node_pools {
            for pool in self.cluster_node_pools().await? {
                let name = pool.name_any();
                self.merge_patch(&self.node_pools, "NodePool", &name, set_image.clone())
                    .await?;
                tracing::info!(cluster = %self.cluster, node_pool = %name, image = %plan.image, "patched NodePool release");
            }
        }
        self.recorder
            .finished(
                UPGRADE_CLUSTER,
                format!("{upgrade_type} upgrade to {desired} requested"),
            )
            .await;
        Ok(())
    }

    pub async fn monitor_upgrade(
        &self,
        upgrade_type: UpgradeType,
        desired: Option<&str>,
        attempts: u32,
    ) -> Result<()> {
        let desired = desired.filter(|d| !d.is_empty()).context(MissingDesiredUpdateSnafu)?;
        if upgrade_type.includes_control_plane() {
            self.wait_until_ready(MONITOR_UPGRADE, Some(desired), attempts)
                .await?;
        }
        if upgrade_type.includes_node_pools() {
            self.wait_for_node_pools(desired, attempts).await?;
        }
        self.recorder
            .finished(MONITOR_UPGRADE, format!("upgraded to {desired}"))
            .await;
        Ok(())
    }

    async fn wait_for_node_pools(&self, desired: &str, attempts: u32) -> Result<()> {
        for attempt in 1..=attempts {
            let pools = self.cluster_node_pools().await?;
            let behind = pools
                .iter()
                .filter(|pool| pool.version() != Some(desired))
                .map(|pool| pool.name_any())
                .collect::<Vec<_>>();
            if behind.is_empty() {
                return Ok(());
            }
            if attempt == 1 {
                self.recorder
                    .started(
                        MONITOR_UPGRADE,
                        format!("waiting for NodePools {} to reach {desired}", behind.join(", ")),
                    )
                    .await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu {
            name: format!("{}/{} NodePools", self.namespace, self.cluster),
        }
        .fail()
    }

    /// Removes the cluster from the hub, leaving the hosted cluster running.
    pub async fn detach(&self, attempts: u32) -> Result<()> {
        let hosted_cluster = self.hosted_cluster().await?;
        if !hosted_cluster.is_detachable() {
            let error = Error::NotDetachable {
                name: self.cluster.clone(),
                platform: hosted_cluster.spec.platform.type_.clone(),
            };
            self.recorder.failed(DETACH_CLUSTER, error.to_string()).await;
            return Err(error);
        }
        let managed_clusters: Api<ManagedCluster> = Api::all(self.client.clone());
        delete_ignoring_missing(&managed_clusters, "ManagedCluster", &self.cluster).await?;
        self.recorder
            .started(DETACH_CLUSTER, format!("detaching ManagedCluster {}", self.cluster))
            .await;

        for _ in 0..attempts {
            let existing = managed_clusters
                .get_opt(&self.cluster)
                .await
                .context(GetManagedClusterSnafu {
                    name: &self.cluster,
                })?;
            if existing.is_none() {
                self.recorder
                    .finished(DETACH_CLUSTER, format!("ManagedCluster {} removed", self.cluster))
                    .await;
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu {
            name: format!("ManagedCluster {}", self.cluster),
        }
        .fail()
    }
}

async fn delete_ignoring_missing<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(error) if retry::is_not_found(&error) => Ok(()),
        Err(source) => Err(Error::Delete {
            source,
            kind,
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn conditions(yaml: &str) -> Vec<ObservedCondition> {
        serde_yaml::from_str(yaml).expect("invalid test input")
    }

    const READY: &str = indoc! {"
        - type: Degraded
          status: 'False'
        - type: Available
          status: 'True'
        - type: ClusterVersionAvailable
          status: 'True'
          message: Done applying 4.14.0
        - type: ClusterVersionProgressing
          status: 'False'
          message: Cluster version is 4.14.0
        - type: Progressing
          status: 'False'
    "};

    #[test]
    fn ready_when_all_conditions_agree() {
        assert_eq!(readiness(&conditions(READY), None), ReadinessOutcome::Ready);
        assert_eq!(
            readiness(&conditions(READY), Some("4.14.0")),
            ReadinessOutcome::Ready
        );
    }

    #[test]
    fn upgrade_waits_for_the_new_version() {
        assert!(matches!(
            readiness(&conditions(READY), Some("4.14.1")),
            ReadinessOutcome::StillProgressing(_)
        ));
    }

    #[rstest]
    #[case("Degraded", "'False'", "'True'")]
    #[case("Available", "'True'", "'False'")]
    #[case("ClusterVersionAvailable", "'True'", "'Unknown'")]
    #[case("ClusterVersionProgressing", "'False'", "'True'")]
    fn not_ready_when_a_condition_disagrees(
        #[case] type_: &str,
        #[case] from: &str,
        #[case] to: &str,
    ) {
        let yaml = READY.replace(
            &format!("type: {type_}\n  status: {from}"),
            &format!("type: {type_}\n  status: {to}"),
        );
        assert!(matches!(
            readiness(&conditions(&yaml), None),
            ReadinessOutcome::StillProgressing(_)
        ));
    }

    #[test]
    fn messages_must_match() {
        let yaml = READY.replace("Done applying 4.14.0", "Working towards 4.14.0");
        assert!(matches!(
            readiness(&conditions(&yaml), None),
            ReadinessOutcome::StillProgressing(_)
        ));
        let yaml = READY.replace("Cluster version is 4.14.0", "Unable to apply");
        assert!(matches!(
            readiness(&conditions(&yaml), None),
            ReadinessOutcome::StillProgressing(_)
        ));
    }

    #[test]
    fn missing_condition_is_not_ready() {
        let yaml = READY.replace("type: Available", "type: Other");
        assert_eq!(
            readiness(&conditions(&yaml), None),
            ReadinessOutcome::StillProgressing("Available not reported".to_string())
        );
        let without_progressing = READY.replace("type: Progressing", "type: Other");
        assert_eq!(
            readiness(&conditions(&without_progressing), None),
            ReadinessOutcome::Ready
        );
        assert!(matches!(
            readiness(&conditions(&without_progressing), Some("4.14.0")),
            ReadinessOutcome::StillProgressing(_)
        ));
    }

    #[test]
    fn invalid_release_image_fails() {
        let yaml = format!(
            "{READY}- type: ValidReleaseImage\n  status: 'False'\n  message: image not found\n"
        );
        assert_eq!(
            readiness(&conditions(&yaml), None),
            ReadinessOutcome::Failed("ValidReleaseImage: image not found".to_string())
        );
    }

    #[test]
    fn node_pools_below_control_plane() {
        let plan = plan_upgrade("hc1", UpgradeType::NodePools, "4.13.7", Some("4.14.0")).unwrap();
        assert_eq!(
            plan,
            UpgradePlan {
                image: "quay.io/openshift-release-dev/ocp-release:4.13.7-multi".to_string(),
                control_plane: false,
                node_pools: true,
            }
        );
    }

    #[test]
    fn node_pools_above_control_plane() {
        let error =
            plan_upgrade("hc1", UpgradeType::NodePools, "4.14.0", Some("4.13.6")).unwrap_err();
        assert!(error.to_string().contains("higher than HostedCluster version"));
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn node_pools_need_a_known_control_plane() {
        assert!(matches!(
            plan_upgrade("hc1", UpgradeType::NodePools, "4.14.0", None),
            Err(Error::UnknownControlPlaneVersion { .. })
        ));
    }

    #[rstest]
    #[case(UpgradeType::ControlPlane, true, false)]
    #[case(UpgradeType::All, true, true)]
    fn control_plane_modes(
        #[case] upgrade_type: UpgradeType,
        #[case] control_plane: bool,
        #[case] node_pools: bool,
    ) {
        let plan = plan_upgrade("hc1", upgrade_type, "4.14.1", Some("4.14.0")).unwrap();
        assert_eq!(plan.control_plane, control_plane);
        assert_eq!(plan.node_pools, node_pools);

        assert!(matches!(
            plan_upgrade("hc1", upgrade_type, "4.14.0", Some("4.14.0")),
            Err(Error::AlreadyAtVersion { .. })
        ));
        assert!(plan_upgrade("hc1", upgrade_type, "4.14.0", None).is_ok());
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(matches!(
            plan_upgrade("hc1", UpgradeType::All, "latest", None),
            Err(Error::InvalidVersion { .. })
        ));
    }
}
