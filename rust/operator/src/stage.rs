//! The steps of a curation pipeline and what each one does when the worker
//! runs it.

use cluster_curator_crd::{
    conditions::{ACTIVATE_AND_MONITOR, APPLY_CLOUD_PROVIDER, CLUSTERCURATOR_JOB},
    v1beta1::ClusterCurator,
    DesiredCuration,
};
use snafu::{ResultExt, Snafu};
use stackable_operator::kube;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    ansible::{self, HookPhase, HookRunner},
    driver::{self, ClusterDriver},
    error::{Classify, ErrorKind},
    import,
    recorder::{self, Recorder},
    secrets::{self, Provider},
    topology,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read ClusterCurator {namespace}/{name}"))]
    GetCurator {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to detect the cluster topology"))]
    Topology { source: topology::Error },

    #[snafu(display("failed to project provider credentials"))]
    Credentials { source: secrets::Error },

    #[snafu(display("hook stage failed"))]
    Hooks { source: ansible::Error },

    #[snafu(display("cluster operation failed"))]
    Driver { source: driver::Error },

    #[snafu(display("import monitoring failed"))]
    Import { source: import::Error },

    #[snafu(display("failed to complete the curation"))]
    Complete { source: recorder::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetCurator { source, .. } => source.kind(),
            Error::Topology { source } => source.kind(),
            Error::Credentials { source } => source.kind(),
            Error::Hooks { source } => source.kind(),
            Error::Driver { source } => source.kind(),
            Error::Import { source } => source.kind(),
            Error::Complete { source } => source.kind(),
        }
    }
}

/// A pipeline step, named the way it is passed to the worker.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    #[strum(serialize = "applycloudprovider-aws")]
    ApplyCloudProviderAws,
    #[strum(serialize = "applycloudprovider-gcp")]
    ApplyCloudProviderGcp,
    #[strum(serialize = "applycloudprovider-azure")]
    ApplyCloudProviderAzure,
    #[strum(serialize = "applycloudprovider-ansible")]
    ApplyCloudProviderAnsible,
    #[strum(serialize = "prehook-ansiblejob")]
    PrehookAnsibleJob,
    #[strum(serialize = "posthook-ansiblejob")]
    PosthookAnsibleJob,
    ActivateAndMonitor,
    Monitor,
    DestroyCluster,
    MonitorDestroy,
    MonitorImport,
    UpgradeCluster,
    MonitorUpgrade,
    DetachCluster,
    Done,
}

impl Stage {
    pub fn apply_cloud_provider(provider: Provider) -> Self {
        match provider {
            Provider::Aws => Stage::ApplyCloudProviderAws,
            Provider::Gcp => Stage::ApplyCloudProviderGcp,
            Provider::Azure => Stage::ApplyCloudProviderAzure,
            Provider::Ansible => Stage::ApplyCloudProviderAnsible,
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            Stage::ApplyCloudProviderAws => Some(Provider::Aws),
            Stage::ApplyCloudProviderGcp => Some(Provider::Gcp),
            Stage::ApplyCloudProviderAzure => Some(Provider::Azure),
            Stage::ApplyCloudProviderAnsible => Some(Provider::Ansible),
            _ => None,
        }
    }

    /// The hook list a hook stage runs, passed to it as `JOB_TYPE`.
    pub fn hook_phase(&self) -> Option<HookPhase> {
        match self {
            Stage::PrehookAnsibleJob => Some(HookPhase::Prehook),
            Stage::PosthookAnsibleJob => Some(HookPhase::Posthook),
            _ => None,
        }
    }
}

/// Identity and inputs of the worker process.
#[derive(Clone, Debug)]
pub struct StageContext {
    pub cluster_name: String,
    /// Namespace of the ClusterCurator.
    pub cluster_namespace: String,
    pub job_type: Option<HookPhase>,
    pub provider_credential_path: Option<String>,
}

/// Runs `stage` against the record named by `context`.
///
/// A failing stage marks the whole curation as failed on the record; the
/// record keeps its `curatingJob` so no new pipeline is started behind it.
pub async fn run(client: kube::Client, context: &StageContext, stage: Stage) -> Result<()> {
    let recorder = Recorder::new(
        client.clone(),
        &context.cluster_namespace,
        &context.cluster_name,
    );
    tracing::info!(
        %stage,
        cluster = %context.cluster_name,
        namespace = %context.cluster_namespace,
        "running stage"
    );
    let result = run_stage(client, context, &recorder, stage).await;
    match &result {
        Ok(()) => tracing::info!(%stage, cluster = %context.cluster_name, "stage completed"),
        Err(error) => {
            tracing::error!(
                %stage,
                cluster = %context.cluster_name,
                error = error as &dyn std::error::Error,
                "stage failed"
            );
            recorder
                .failed(CLUSTERCURATOR_JOB, format!("{stage} failed: {}", full_message(error)))
                .await;
        }
    }
    result
}

/// The error and all of its sources on one line.
fn full_message(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn run_stage(
    client: kube::Client,
    context: &StageContext,
    recorder: &Recorder,
    stage: Stage,
) -> Result<()> {
    let curator = recorder.get().await.context(GetCuratorSnafu {
        namespace: &context.cluster_namespace,
        name: &context.cluster_name,
    })?;
    let curation = curator.spec.desired_curation;

    if stage == Stage::Done {
        return recorder.complete().await.context(CompleteSnafu);
    }
    if let Some(provider) = stage.provider() {
        return apply_cloud_provider(client, context, recorder, &curator, provider).await;
    }
    if let Some(phase) = stage.hook_phase() {
        if context.job_type.is_some_and(|job_type| job_type != phase) {
            tracing::warn!(%stage, job_type = ?context.job_type, "JOB_TYPE does not match the stage");
        }
        return run_hooks(client, context, recorder, &curator, phase).await;
    }

    let topology = topology::detect(client.clone(), &curator)
        .await
        .context(TopologySnafu)?;
    let attempts = curator.monitor_attempts(curation);
    tracing::debug!(%topology, attempts, "dispatching cluster operation");
    let driver = driver::for_topology(client.clone(), recorder.clone(), &curator, topology);

    match stage {
        Stage::ActivateAndMonitor => {
            recorder
                .started(ACTIVATE_AND_MONITOR, format!("activating {topology} cluster"))
                .await;
            activate_and_monitor(driver.as_ref(), attempts).await?;
            recorder
                .finished(ACTIVATE_AND_MONITOR, "cluster provisioned")
                .await;
            Ok(())
        }
        Stage::Monitor => driver.monitor_install(attempts).await.context(DriverSnafu),
        Stage::DestroyCluster => driver.destroy().await.context(DriverSnafu),
        Stage::MonitorDestroy => driver.monitor_destroy(attempts).await.context(DriverSnafu),
        Stage::MonitorImport => import::monitor(client, recorder, &curator.cluster_name(), attempts)
            .await
            .context(ImportSnafu),
        Stage::UpgradeCluster => driver.upgrade(&curator).await.context(DriverSnafu),
        Stage::MonitorUpgrade => driver.monitor_upgrade(&curator).await.context(DriverSnafu),
        Stage::DetachCluster => driver.detach(attempts).await.context(DriverSnafu),
        Stage::ApplyCloudProviderAws
        | Stage::ApplyCloudProviderGcp
        | Stage::ApplyCloudProviderAzure
        | Stage::ApplyCloudProviderAnsible
        | Stage::PrehookAnsibleJob
        | Stage::PosthookAnsibleJob
        | Stage::Done => Ok(()),
    }
}

async fn activate_and_monitor(driver: &dyn ClusterDriver, attempts: u32) -> Result<()> {
    driver.activate().await.context(DriverSnafu)?;
    driver.monitor_install(attempts).await.context(DriverSnafu)
}

async fn apply_cloud_provider(
    client: kube::Client,
    context: &StageContext,
    recorder: &Recorder,
    curator: &ClusterCurator,
    provider: Provider,
) -> Result<()> {
    let credential_path = context
        .provider_credential_path
        .as_deref()
        .filter(|path| !path.is_empty())
        .or(curator.spec.provider_credential_path.as_deref());
    recorder
        .started(APPLY_CLOUD_PROVIDER, format!("projecting {provider} credentials"))
        .await;
    let result = secrets::project_credentials(
        client,
        provider,
        credential_path,
        &curator.cluster_name(),
        &context.cluster_namespace,
    )
    .await
    .context(CredentialsSnafu);
    match &result {
        Ok(()) => {
            recorder
                .finished(APPLY_CLOUD_PROVIDER, format!("{provider} credentials projected"))
                .await
        }
        Err(error) => {
            recorder
                .failed(APPLY_CLOUD_PROVIDER, full_message(error))
                .await
        }
    }
    result
}

async fn run_hooks(
    client: kube::Client,
    context: &StageContext,
    recorder: &Recorder,
    curator: &ClusterCurator,
    phase: HookPhase,
) -> Result<()> {
    let curation = curator.spec.desired_curation;
    if curation == DesiredCuration::Destroy && phase == HookPhase::Posthook {
        return Err(ansible::Error::PhaseNotSupported { phase }).context(HooksSnafu);
    }
    let hooks = curator.hooks_for(curation);
    let hooks = match phase {
        HookPhase::Prehook => hooks.prehook,
        HookPhase::Posthook => hooks.posthook,
    };
    HookRunner::new(
        client,
        recorder.clone(),
        &curator.cluster_name(),
        &context.cluster_namespace,
    )
    .run_all(phase, hooks)
    .await
    .context(HooksSnafu)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("applycloudprovider-aws", Stage::ApplyCloudProviderAws)]
    #[case("applycloudprovider-ansible", Stage::ApplyCloudProviderAnsible)]
    #[case("prehook-ansiblejob", Stage::PrehookAnsibleJob)]
    #[case("posthook-ansiblejob", Stage::PosthookAnsibleJob)]
    #[case("activate-and-monitor", Stage::ActivateAndMonitor)]
    #[case("monitor", Stage::Monitor)]
    #[case("destroy-cluster", Stage::DestroyCluster)]
    #[case("monitor-destroy", Stage::MonitorDestroy)]
    #[case("monitor-import", Stage::MonitorImport)]
    #[case("upgrade-cluster", Stage::UpgradeCluster)]
    #[case("monitor-upgrade", Stage::MonitorUpgrade)]
    #[case("detach-cluster", Stage::DetachCluster)]
    #[case("done", Stage::Done)]
    fn stage_names(#[case] name: &str, #[case] stage: Stage) {
        assert_eq!(Stage::from_str(name).unwrap(), stage);
        assert_eq!(stage.to_string(), name);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(Stage::from_str("install").is_err());
    }

    #[rstest]
    #[case(Provider::Aws)]
    #[case(Provider::Gcp)]
    #[case(Provider::Azure)]
    #[case(Provider::Ansible)]
    fn cloud_provider_stages(#[case] provider: Provider) {
        let stage = Stage::apply_cloud_provider(provider);
        assert_eq!(stage.provider(), Some(provider));
        assert_eq!(stage.to_string(), format!("applycloudprovider-{provider}"));
    }

    #[test]
    fn hook_stages_know_their_phase() {
        assert_eq!(Stage::PrehookAnsibleJob.hook_phase(), Some(HookPhase::Prehook));
        assert_eq!(Stage::PosthookAnsibleJob.hook_phase(), Some(HookPhase::Posthook));
        assert_eq!(Stage::MonitorImport.hook_phase(), None);
    }

    #[test]
    fn failure_message_includes_causes() {
        let error = Error::Driver {
            source: driver::Error::DetachNotSupported,
        };
        assert_eq!(
            full_message(&error),
            "cluster operation failed: only hosted clusters can be detached"
        );
        assert_eq!(error.kind(), ErrorKind::Validation);
    }
}
