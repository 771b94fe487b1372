//! Upgrades classic managed clusters through the hub.
//!
//! The managed cluster's `ClusterVersion` is read through a
//! [`ManagedClusterView`] and written back through a [`ManagedClusterAction`];
//! the curator never talks to the managed cluster's API server itself.

use std::time::Duration;

use cluster_curator_crd::{
    conditions::{find_observed, ObservedCondition, MONITOR_UPGRADE, UPGRADE_CLUSTER},
    ocm::{
        KubeWorkSpec, ManagedClusterAction, ManagedClusterActionSpec, ManagedClusterInfo,
        ManagedClusterView, ManagedClusterViewSpec, ViewScope, ACTION_TYPE_UPDATE,
        CLUSTERVERSION_NAME, CLUSTERVERSION_RESOURCE, KUBE_VENDOR_OPENSHIFT,
        REASON_UPDATE_RESOURCE_FAILED,
    },
    util,
    v1beta1::ClusterCurator,
};
use serde::Deserialize;
use serde_json::{json, Value};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    kube::{
        self,
        api::{DeleteParams, PostParams},
        Api,
    },
};

use crate::{
    error::{Classify, ErrorKind},
    recorder::Recorder,
    retry,
};

pub const VIEW_FETCH_INTERVAL: Duration = Duration::from_secs(5);
pub const VIEW_FETCH_ATTEMPTS: u32 = 5;
pub const ACTION_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const ACTION_POLL_ATTEMPTS: u32 = 12;
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

const CONDITION_AVAILABLE: &str = "Available";
const SERVER_OWNED_METADATA: [&str; 5] = [
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
];

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read ManagedClusterInfo {cluster}"))]
    GetManagedClusterInfo { source: kube::Error, cluster: String },

    #[snafu(display("ManagedClusterInfo {cluster} not found"))]
    ManagedClusterInfoNotFound { cluster: String },

    #[snafu(display("cluster {cluster} is a {vendor:?} cluster, only OpenShift clusters can be upgraded"))]
    NotOpenShift { cluster: String, vendor: String },

    #[snafu(display("at least one of desiredUpdate, channel or upstream must be set"))]
    NothingRequested,

    #[snafu(display("version {version} is not among the available updates of cluster {cluster}"))]
    VersionNotAvailable { cluster: String, version: String },

    #[snafu(display("channel {channel} is not offered for the desired version of cluster {cluster}"))]
    ChannelNotAvailable { cluster: String, channel: String },

    #[snafu(display("failed to ensure ManagedClusterView {cluster}"))]
    EnsureView { source: kube::Error, cluster: String },

    #[snafu(display("ManagedClusterView {cluster} did not return the ClusterVersion"))]
    ViewNotPopulated { cluster: String },

    #[snafu(display("the ClusterVersion of cluster {cluster} is malformed"))]
    ParseClusterVersion {
        source: serde_json::Error,
        cluster: String,
    },

    #[snafu(display("the ClusterVersion of cluster {cluster} has no spec"))]
    MissingClusterVersionSpec { cluster: String },

    #[snafu(display("failed to submit ManagedClusterAction {cluster}"))]
    SubmitAction { source: kube::Error, cluster: String },

    #[snafu(display("ManagedClusterAction {cluster} failed: {message}"))]
    ActionFailed { cluster: String, message: String },

    #[snafu(display("Timed out waiting for job {name}"))]
    TimedOut { name: String },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetManagedClusterInfo { source, .. }
            | Error::EnsureView { source, .. }
            | Error::SubmitAction { source, .. } => source.kind(),
            Error::ManagedClusterInfoNotFound { .. } | Error::ViewNotPopulated { .. } => {
                ErrorKind::Transient
            }
            Error::NotOpenShift { .. }
            | Error::NothingRequested
            | Error::VersionNotAvailable { .. }
            | Error::ChannelNotAvailable { .. }
            | Error::ParseClusterVersion { .. }
            | Error::MissingClusterVersionSpec { .. } => ErrorKind::Validation,
            Error::ActionFailed { .. } => ErrorKind::RemoteOperator,
            Error::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

/// What the user asked the cluster to move to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpgradeRequest {
    pub desired_update: Option<String>,
    pub channel: Option<String>,
    pub upstream: Option<String>,
    /// Skip the recommended-update check and pin the release image.
    pub force: bool,
}

impl UpgradeRequest {
    pub fn from_curator(curator: &ClusterCurator) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        let upgrade = curator.spec.upgrade.clone().unwrap_or_default();
        Self {
            desired_update: non_empty(&upgrade.desired_update),
            channel: non_empty(&upgrade.channel),
            upstream: non_empty(&upgrade.upstream),
            force: curator.allows_not_recommended_versions(),
        }
    }

    fn is_empty(&self) -> bool {
        self.desired_update.is_none() && self.channel.is_none() && self.upstream.is_none()
    }
}

/// The parts of a remote `config.openshift.io/v1 ClusterVersion` the upgrade looks at.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterVersion {
    #[serde(default)]
    pub spec: ClusterVersionSpec,

    #[serde(default)]
    pub status: ClusterVersionStatus,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterVersionSpec {
    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub upstream: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionStatus {
    #[serde(default)]
    pub available_updates: Option<Vec<ReleaseInfo>>,

    #[serde(default)]
    pub desired: ReleaseInfo,

    #[serde(default)]
    pub conditions: Vec<ObservedCondition>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub channels: Vec<String>,
}

impl ClusterVersion {
    fn available_update(&self, version: &str) -> Option<&ReleaseInfo> {
        self.status
            .available_updates
            .iter()
            .flatten()
            .find(|update| update.version == version)
    }
}

/// Checks the request against what the managed cluster reports.
pub fn validate(
    cluster: &str,
    info: &ManagedClusterInfo,
    cluster_version: &ClusterVersion,
    request: &UpgradeRequest,
) -> Result<()> {
    if info.kube_vendor() != KUBE_VENDOR_OPENSHIFT {
        return NotOpenShiftSnafu {
            cluster,
            vendor: info.kube_vendor(),
        }
        .fail();
    }
    if request.is_empty() {
        return NothingRequestedSnafu.fail();
    }
    if let Some(version) = &request.desired_update {
        if !request.force && cluster_version.available_update(version).is_none() {
            return VersionNotAvailableSnafu { cluster, version }.fail();
        }
    }
    if let Some(channel) = &request.channel {
        if !cluster_version.status.desired.channels.contains(channel) {
            return ChannelNotAvailableSnafu { cluster, channel }.fail();
        }
    }
    Ok(())
}

/// Applies the request to the raw remote `ClusterVersion`, which is written
/// back whole so fields this view does not model survive.
///
/// Fields owned by the managed cluster's API server are dropped, so the
/// write never carries a stale `resourceVersion`.
pub fn apply_request(
    cluster: &str,
    raw: &mut Value,
    cluster_version: &ClusterVersion,
    request: &UpgradeRequest,
) -> Result<()> {
    let spec = raw
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .context(MissingClusterVersionSpecSnafu { cluster })?;

    if let Some(version) = &request.desired_update {
        let desired_update = if request.force {
            // The payload hash of an unrecommended release is unknown, so pin the tag.
            json!({
                "version": version,
                "force": true,
                "image": util::release_image(version),
            })
        } else {
            let image = cluster_version
                .available_update(version)
                .map(|update| update.image.clone())
                .unwrap_or_default();
            json!({ "version": version, "image": image })
        };
        spec.insert("desiredUpdate".to_string(), desired_update);
    }
    if let Some(channel) = &request.channel {
        spec.insert("channel".to_string(), json!(channel));
    }
    if let Some(upstream) = &request.upstream {
        spec.insert("upstream".to_string(), json!(upstream));
    }

    if let Some(metadata) = raw.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_OWNED_METADATA {
            metadata.remove(field);
        }
    }
    if let Some(object) = raw.as_object_mut() {
        object.remove("status");
    }
    Ok(())
}

/// Whether the projected `ClusterVersion` shows the request as done.
pub fn upgrade_observed(cluster_version: &ClusterVersion, request: &UpgradeRequest) -> bool {
    match &request.desired_update {
        Some(version) => find_observed(&cluster_version.status.conditions, CONDITION_AVAILABLE)
            .is_some_and(|c| c.is_true() && c.message().contains(version.as_str())),
        None => {
            request
                .channel
                .as_ref()
                .map_or(true, |channel| cluster_version.spec.channel.as_ref() == Some(channel))
                && request
                    .upstream
                    .as_ref()
                    .map_or(true, |upstream| {
                        cluster_version.spec.upstream.as_ref() == Some(upstream)
                    })
        }
    }
}

/// `false` when the cluster already runs the requested version.
pub fn need_to_upgrade(info: Option<&ManagedClusterInfo>, request: &UpgradeRequest) -> bool {
    match (&request.desired_update, info.and_then(ManagedClusterInfo::ocp_version)) {
        (Some(desired), Some(current)) => desired != current,
        _ => true,
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum ActionOutcome {
    Completed,
    Retryable(String),
    Failed(String),
}

fn action_outcome(action: &ManagedClusterAction) -> Option<ActionOutcome> {
    let completed = action.completed()?;
    if completed.is_true() {
        Some(ActionOutcome::Completed)
    } else if completed.reason.as_deref() == Some(REASON_UPDATE_RESOURCE_FAILED) {
        Some(ActionOutcome::Retryable(completed.message().to_string()))
    } else if completed.is_false() {
        Some(ActionOutcome::Failed(completed.message().to_string()))
    } else {
        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum SubmitStep {
    Done,
    /// Rejected with `UpdateResourceFailed` and there is budget left.
    Resubmit(String),
}

/// What follows the `attempt`th submission of the update, given how its
/// action settled. The last rejection's message is the failure's message.
fn submit_step(
    cluster: &str,
    attempt: u32,
    backoff_limit: u32,
    outcome: Option<ActionOutcome>,
) -> Result<SubmitStep> {
    match outcome {
        Some(ActionOutcome::Completed) => Ok(SubmitStep::Done),
        Some(ActionOutcome::Retryable(message)) if attempt < backoff_limit => {
            Ok(SubmitStep::Resubmit(message))
        }
        Some(ActionOutcome::Retryable(message) | ActionOutcome::Failed(message)) => {
            ActionFailedSnafu { cluster, message }.fail()
        }
        None => TimedOutSnafu {
            name: format!("ManagedClusterAction {cluster}"),
        }
        .fail(),
    }
}

/// The resubmit budget, falling back to the minimum when the
/// ClusterCurator could not be read.
fn backoff_limit_of(curator: Option<&ClusterCurator>) -> u32 {
    curator.map_or_else(
        || util::clamp_backoff_limit(None),
        ClusterCurator::clusterversion_backoff_limit,
    )
}

pub fn build_view(cluster: &str) -> ManagedClusterView {
    ManagedClusterView {
        metadata: ObjectMeta {
            name: Some(cluster.to_string()),
            namespace: Some(cluster.to_string()),
            ..ObjectMeta::default()
        },
        spec: ManagedClusterViewSpec {
            scope: ViewScope::cluster_version(),
        },
        status: None,
    }
}

pub fn build_action(cluster: &str, template: Value) -> ManagedClusterAction {
    ManagedClusterAction {
        metadata: ObjectMeta {
            name: Some(cluster.to_string()),
            namespace: Some(cluster.to_string()),
            ..ObjectMeta::default()
        },
        spec: ManagedClusterActionSpec {
            action_type: ACTION_TYPE_UPDATE.to_string(),
            kube: KubeWorkSpec {
                resource: CLUSTERVERSION_RESOURCE.to_string(),
                name: CLUSTERVERSION_NAME.to_string(),
                namespace: None,
                template: Some(template),
            },
        },
        status: None,
    }
}

pub struct Upgrader {
    client: kube::Client,
    views: Api<ManagedClusterView>,
    actions: Api<ManagedClusterAction>,
    recorder: Recorder,
    cluster: String,
}

impl Upgrader {
    pub fn new(client: kube::Client, recorder: Recorder, cluster: &str) -> Self {
        Self {
            views: Api::namespaced(client.clone(), cluster),
            actions: Api::namespaced(client.clone(), cluster),
            client,
            recorder,
            cluster: cluster.to_string(),
        }
    }

    pub async fn managed_cluster_info(&self) -> Result<Option<ManagedClusterInfo>> {
        Api::<ManagedClusterInfo>::namespaced(self.client.clone(), &self.cluster)
            .get_opt(&self.cluster)
            .await
            .context(GetManagedClusterInfoSnafu {
                cluster: &self.cluster,
            })
    }

    pub async fn need_to_upgrade(&self, request: &UpgradeRequest) -> Result<bool> {
        let info = self.managed_cluster_info().await?;
        Ok(need_to_upgrade(info.as_ref(), request))
    }

    /// Creates the `ClusterVersion` view if needed and waits for the managed
    /// cluster to fill it in.
    async fn fetch_cluster_version(&self) -> Result<Value> {
        let view = build_view(&self.cluster);
        match self.views.create(&PostParams::default(), &view).await {
            Ok(_) => tracing::info!(cluster = %self.cluster, "created ManagedClusterView"),
            Err(error) if retry::is_already_exists(&error) => {}
            Err(source) => {
                return Err(Error::EnsureView {
                    source,
                    cluster: self.cluster.clone(),
                })
            }
        }

        let result = retry::poll(VIEW_FETCH_INTERVAL, VIEW_FETCH_ATTEMPTS, |attempt| async move {
            let view = self
                .views
                .get_opt(&self.cluster)
                .await
                .context(EnsureViewSnafu {
                    cluster: &self.cluster,
                })?;
            let result = view.as_ref().and_then(ManagedClusterView::result).cloned();
            if result.is_none() {
                tracing::debug!(cluster = %self.cluster, attempt, "ManagedClusterView not populated yet");
            }
            Ok::<_, Error>(result)
        })
        .await?;
        result.context(ViewNotPopulatedSnafu {
            cluster: &self.cluster,
        })
    }

    pub async fn upgrade(&self, request: &UpgradeRequest) -> Result<()> {
        match self.try_upgrade(request).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.recorder.failed(UPGRADE_CLUSTER, error.to_string()).await;
                Err(error)
            }
        }
    }

    async fn try_upgrade(&self, request: &UpgradeRequest) -> Result<()> {
        self.recorder
            .started(UPGRADE_CLUSTER, "upgrade started")
            .await;
        let info = self
            .managed_cluster_info()
            .await?
            .context(ManagedClusterInfoNotFoundSnafu {
                cluster: &self.cluster,
            })?;
        let (cluster_version, mut raw) = self.read_cluster_version().await?;

        validate(&self.cluster, &info, &cluster_version, request)?;
        apply_request(&self.cluster, &mut raw, &cluster_version, request)?;
        let backoff_limit = self.backoff_limit().await;
        self.submit_update(raw, request, backoff_limit).await?;

        self.recorder
            .finished(UPGRADE_CLUSTER, "ClusterVersion updated on the managed cluster")
            .await;
        Ok(())
    }

    async fn read_cluster_version(&self) -> Result<(ClusterVersion, Value)> {
        let raw = self.fetch_cluster_version().await?;
        let cluster_version =
            serde_json::from_value(raw.clone()).context(ParseClusterVersionSnafu {
                cluster: &self.cluster,
            })?;
        Ok((cluster_version, raw))
    }

    async fn backoff_limit(&self) -> u32 {
        match self.recorder.get().await {
            Ok(curator) => backoff_limit_of(Some(&curator)),
            Err(error) => {
                tracing::warn!(
                    cluster = %self.cluster,
                    error = &error as &dyn std::error::Error,
                    "failed to read the ClusterCurator, ignoring its backoff limit annotation"
                );
                backoff_limit_of(None)
            }
        }
    }

    /// Writes `update` through a fresh action, resubmitting while the
    /// managed cluster rejects the update. Every resubmission is rebuilt from
    /// the `ClusterVersion` as it is now.
    async fn submit_update(
        &self,
        mut update: Value,
        request: &UpgradeRequest,
        backoff_limit: u32,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            self.delete_action().await?;
            self.actions
                .create(&PostParams::default(), &build_action(&self.cluster, update))
                .await
                .context(SubmitActionSnafu {
                    cluster: &self.cluster,
                })?;
            tracing::info!(cluster = %self.cluster, attempt, "submitted ClusterVersion update");

            let outcome = retry::poll(ACTION_POLL_INTERVAL, ACTION_POLL_ATTEMPTS, |_| async move {
                let action = self
                    .actions
                    .get_opt(&self.cluster)
                    .await
                    .context(SubmitActionSnafu {
                        cluster: &self.cluster,
                    })?;
                Ok::<_, Error>(action.as_ref().and_then(action_outcome))
            })
            .await?;
            match submit_step(&self.cluster, attempt, backoff_limit, outcome)? {
                SubmitStep::Done => return Ok(()),
                SubmitStep::Resubmit(message) => {
                    tracing::warn!(cluster = %self.cluster, attempt, %message, "ClusterVersion update rejected, retrying");
                    attempt += 1;
                    let (cluster_version, mut raw) = self.read_cluster_version().await?;
                    apply_request(&self.cluster, &mut raw, &cluster_version, request)?;
                    update = raw;
                }
            }
        }
    }

    async fn delete_action(&self) -> Result<()> {
        match self
            .actions
            .delete(&self.cluster, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if retry::is_not_found(&error) => Ok(()),
            Err(source) => Err(Error::SubmitAction {
                source,
                cluster: self.cluster.clone(),
            }),
        }
    }

    pub async fn monitor(&self, request: &UpgradeRequest, timeout: Duration) -> Result<()> {
        let attempts = u32::try_from(timeout.as_secs() / MONITOR_INTERVAL.as_secs())
            .unwrap_or(u32::MAX)
            .max(1);
        self.recorder
            .started(MONITOR_UPGRADE, "waiting for the managed cluster to report the upgrade")
            .await;

        let observed = retry::poll(MONITOR_INTERVAL, attempts, |attempt| async move {
            let raw = match self.fetch_cluster_version().await {
                Ok(raw) => raw,
                Err(Error::ViewNotPopulated { .. }) => return Ok(None),
                Err(error) => return Err(error),
            };
            let cluster_version: ClusterVersion =
                serde_json::from_value(raw).context(ParseClusterVersionSnafu {
                    cluster: &self.cluster,
                })?;
            let done = upgrade_observed(&cluster_version, request);
            tracing::debug!(cluster = %self.cluster, attempt, done, "checked upgrade progress");
            Ok::<_, Error>(done.then_some(()))
        })
        .await?;

        match observed {
            Some(()) => {
                self.recorder
                    .finished(MONITOR_UPGRADE, "upgrade completed")
                    .await;
                Ok(())
            }
            None => {
                self.recorder
                    .failed(MONITOR_UPGRADE, "Timed out waiting for the upgrade")
                    .await;
                TimedOutSnafu {
                    name: format!("ClusterVersion upgrade of {}", self.cluster),
                }
                .fail()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn info(vendor: &str, version: &str) -> ManagedClusterInfo {
        serde_yaml::from_str(&format!(
            indoc! {"
                apiVersion: internal.open-cluster-management.io/v1beta1
                kind: ManagedClusterInfo
                metadata:
                  name: c1
                  namespace: c1
                spec: {{}}
                status:
                  kubeVendor: {vendor}
                  distributionInfo:
                    ocp:
                      version: '{version}'
            "},
            vendor = vendor,
            version = version,
        ))
        .expect("invalid test input")
    }

    fn raw_cluster_version() -> Value {
        serde_yaml::from_str(indoc! {"
            apiVersion: config.openshift.io/v1
            kind: ClusterVersion
            metadata:
              name: version
              resourceVersion: '42'
            spec:
              clusterID: 0a1b2c
              channel: stable-4.13
            status:
              availableUpdates:
                - version: 4.13.7
                  image: quay.io/openshift-release-dev/ocp-release@sha256:abc
              desired:
                version: 4.13.6
                channels:
                  - stable-4.13
                  - fast-4.14
              conditions:
                - type: Available
                  status: 'True'
                  message: Done applying 4.13.6
        "})
        .expect("invalid test input")
    }

    fn request(desired: Option<&str>, channel: Option<&str>, force: bool) -> UpgradeRequest {
        UpgradeRequest {
            desired_update: desired.map(str::to_string),
            channel: channel.map(str::to_string),
            upstream: None,
            force,
        }
    }

    #[test]
    fn forced_upgrade_pins_the_release_image() {
        let mut raw = raw_cluster_version();
        let cluster_version: ClusterVersion = serde_json::from_value(raw.clone()).unwrap();
        let request = request(Some("4.14.0"), Some("fast-4.14"), true);

        validate("c1", &info("OpenShift", "4.13.6"), &cluster_version, &request).unwrap();
        apply_request("c1", &mut raw, &cluster_version, &request).unwrap();

        assert_eq!(
            raw["spec"]["desiredUpdate"],
            json!({
                "version": "4.14.0",
                "force": true,
                "image": "quay.io/openshift-release-dev/ocp-release:4.14.0-multi",
            })
        );
        assert_eq!(raw["spec"]["channel"], json!("fast-4.14"));
        assert_eq!(raw["spec"]["clusterID"], json!("0a1b2c"));
        assert_eq!(raw["metadata"]["name"], json!("version"));
        assert_eq!(raw["metadata"].get("resourceVersion"), None);
        assert_eq!(raw.get("status"), None);
    }

    #[test]
    fn resubmitted_update_follows_the_remote_state() {
        let request = request(Some("4.13.7"), None, false);
        let mut first = raw_cluster_version();
        let cluster_version: ClusterVersion = serde_json::from_value(first.clone()).unwrap();
        apply_request("c1", &mut first, &cluster_version, &request).unwrap();

        // The managed cluster moved on between the two submissions.
        let mut reread = raw_cluster_version();
        reread["metadata"]["resourceVersion"] = json!("43");
        reread["spec"]["clusterID"] = json!("9f8e7d");
        let cluster_version: ClusterVersion = serde_json::from_value(reread.clone()).unwrap();
        apply_request("c1", &mut reread, &cluster_version, &request).unwrap();

        assert_ne!(first, reread);
        assert_eq!(reread["spec"]["clusterID"], json!("9f8e7d"));
        assert_eq!(reread["spec"]["desiredUpdate"], first["spec"]["desiredUpdate"]);
        for update in [&first, &reread] {
            assert_eq!(update["metadata"].get("resourceVersion"), None);
        }
    }

    #[test]
    fn recommended_upgrade_uses_the_offered_image() {
        let mut raw = raw_cluster_version();
        let cluster_version: ClusterVersion = serde_json::from_value(raw.clone()).unwrap();
        let request = request(Some("4.13.7"), None, false);

        validate("c1", &info("OpenShift", "4.13.6"), &cluster_version, &request).unwrap();
        apply_request("c1", &mut raw, &cluster_version, &request).unwrap();
        assert_eq!(
            raw["spec"]["desiredUpdate"],
            json!({
                "version": "4.13.7",
                "image": "quay.io/openshift-release-dev/ocp-release@sha256:abc",
            })
        );
        assert_eq!(raw["spec"]["channel"], json!("stable-4.13"));
    }

    #[rstest]
    #[case::not_openshift("EKS", request(Some("4.13.7"), None, false), "NotOpenShift")]
    #[case::nothing_requested("OpenShift", request(None, None, false), "NothingRequested")]
    #[case::not_recommended("OpenShift", request(Some("4.14.0"), None, false), "VersionNotAvailable")]
    #[case::unknown_channel("OpenShift", request(None, Some("candidate-4.15"), false), "ChannelNotAvailable")]
    fn rejects_invalid_requests(
        #[case] vendor: &str,
        #[case] upgrade_request: UpgradeRequest,
        #[case] expected: &str,
    ) {
        let cluster_version: ClusterVersion =
            serde_json::from_value(raw_cluster_version()).unwrap();
        let error = validate("c1", &info(vendor, "4.13.6"), &cluster_version, &upgrade_request)
            .unwrap_err();
        assert!(format!("{error:?}").starts_with(expected), "{error:?}");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn channel_only_upgrade_is_observed_in_the_spec() {
        let mut raw = raw_cluster_version();
        let request = request(None, Some("fast-4.14"), false);
        let before: ClusterVersion = serde_json::from_value(raw.clone()).unwrap();
        assert!(!upgrade_observed(&before, &request));

        apply_request("c1", &mut raw, &before, &request).unwrap();
        let after: ClusterVersion = serde_json::from_value(raw).unwrap();
        assert!(upgrade_observed(&after, &request));
    }

    #[test]
    fn version_upgrade_is_observed_in_the_available_condition() {
        let cluster_version: ClusterVersion =
            serde_json::from_value(raw_cluster_version()).unwrap();
        assert!(upgrade_observed(&cluster_version, &request(Some("4.13.6"), None, false)));
        assert!(!upgrade_observed(&cluster_version, &request(Some("4.13.7"), None, false)));
    }

    #[rstest]
    #[case(Some("4.13.6"), "4.13.6", false)]
    #[case(Some("4.13.7"), "4.13.6", true)]
    #[case(None, "4.13.6", true)]
    fn skips_upgrades_to_the_running_version(
        #[case] desired: Option<&str>,
        #[case] running: &str,
        #[case] expected: bool,
    ) {
        let info = info("OpenShift", running);
        assert_eq!(
            need_to_upgrade(Some(&info), &request(desired, Some("fast-4.14"), false)),
            expected
        );
        assert!(need_to_upgrade(None, &request(desired, None, false)));
    }

    #[test]
    fn action_outcomes() {
        let action = |conditions: &str| -> ManagedClusterAction {
            serde_yaml::from_str(&format!(
                "apiVersion: action.open-cluster-management.io/v1beta1\n\
                 kind: ManagedClusterAction\n\
                 metadata: {{name: c1, namespace: c1}}\n\
                 spec: {{actionType: Update, kube: {{resource: clusterversions, name: version}}}}\n\
                 status: {{conditions: {conditions}}}\n"
            ))
            .expect("invalid test input")
        };
        assert_eq!(action_outcome(&action("[]")), None);
        assert_eq!(
            action_outcome(&action("[{type: Completed, status: 'True'}]")),
            Some(ActionOutcome::Completed)
        );
        assert_eq!(
            action_outcome(&action(
                "[{type: Completed, status: 'False', reason: UpdateResourceFailed, message: conflict}]"
            )),
            Some(ActionOutcome::Retryable("conflict".to_string()))
        );
        assert_eq!(
            action_outcome(&action(
                "[{type: Completed, status: 'False', reason: Forbidden, message: denied}]"
            )),
            Some(ActionOutcome::Failed("denied".to_string()))
        );
    }

    /// Feeds settled actions through `submit_step` the way `submit_update`
    /// does and returns how many submissions were made.
    fn submissions(
        backoff_limit: u32,
        outcomes: impl IntoIterator<Item = Option<ActionOutcome>>,
    ) -> (u32, Result<()>) {
        let mut attempt = 1;
        for outcome in outcomes {
            match submit_step("c1", attempt, backoff_limit, outcome) {
                Ok(SubmitStep::Done) => return (attempt, Ok(())),
                Ok(SubmitStep::Resubmit(_)) => attempt += 1,
                Err(error) => return (attempt, Err(error)),
            }
        }
        panic!("no outcome left for submission {attempt}");
    }

    fn rejected(message: &str) -> Option<ActionOutcome> {
        Some(ActionOutcome::Retryable(message.to_string()))
    }

    #[test]
    fn resubmits_until_the_backoff_limit() {
        let (attempts, result) = submissions(
            3,
            ["conflict 1", "conflict 2", "conflict 3", "conflict 4"].map(rejected),
        );
        assert_eq!(attempts, 3);
        let error = result.unwrap_err();
        assert!(
            matches!(&error, Error::ActionFailed { cluster, message } if cluster == "c1" && message == "conflict 3"),
            "{error:?}"
        );
        assert_eq!(error.kind(), ErrorKind::RemoteOperator);
    }

    #[rstest]
    #[case::first_try(3, vec![Some(ActionOutcome::Completed)], 1)]
    #[case::after_a_rejection(3, vec![rejected("conflict"), Some(ActionOutcome::Completed)], 2)]
    #[case::on_the_last_try(2, vec![rejected("conflict"), Some(ActionOutcome::Completed)], 2)]
    fn completes_within_the_budget(
        #[case] backoff_limit: u32,
        #[case] outcomes: Vec<Option<ActionOutcome>>,
        #[case] expected_attempts: u32,
    ) {
        let (attempts, result) = submissions(backoff_limit, outcomes);
        assert_eq!(attempts, expected_attempts);
        result.unwrap();
    }

    #[rstest]
    #[case::hard_failure(5, Some(ActionOutcome::Failed("denied".to_string())), ErrorKind::RemoteOperator)]
    #[case::single_try(1, rejected("conflict"), ErrorKind::RemoteOperator)]
    #[case::never_settled(5, None, ErrorKind::Timeout)]
    fn stops_without_resubmitting(
        #[case] backoff_limit: u32,
        #[case] outcome: Option<ActionOutcome>,
        #[case] expected: ErrorKind,
    ) {
        let (attempts, result) = submissions(backoff_limit, [outcome]);
        assert_eq!(attempts, 1);
        assert_eq!(result.unwrap_err().kind(), expected);
    }

    #[test]
    fn unreadable_curator_gets_the_minimum_backoff_limit() {
        assert_eq!(backoff_limit_of(None), 1);

        let mut curator = ClusterCurator::new("c1", Default::default());
        curator.metadata.annotations = Some(
            [(
                cluster_curator_crd::CLUSTERVERSION_BACKOFF_LIMIT_ANNOTATION.to_string(),
                "7".to_string(),
            )]
            .into(),
        );
        assert_eq!(backoff_limit_of(Some(&curator)), 7);
    }

    #[test]
    fn view_targets_the_cluster_version() {
        let view = build_view("c1");
        assert_eq!(view.metadata.namespace.as_deref(), Some("c1"));
        assert_eq!(view.spec.scope.kind.as_deref(), Some("ClusterVersion"));
        assert_eq!(view.spec.scope.name, "version");

        let action = build_action("c1", json!({"spec": {}}));
        assert_eq!(action.spec.action_type, "Update");
        assert_eq!(action.spec.kube.resource, "clusterversions");
    }
}
