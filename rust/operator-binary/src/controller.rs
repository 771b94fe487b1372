//! Turns a requested curation on a [`ClusterCurator`] into one pipeline Job.
//!
//! The reconciler never waits for the pipeline. It prepares RBAC, creates the
//! Job and marks the record with `spec.curatingJob`; the workers the Job runs
//! report progress through conditions, and the final stage releases the record.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cluster_curator_crd::{conditions::CLUSTERCURATOR_JOB, v1beta1::ClusterCurator, DesiredCuration};
use cluster_curator_operator::{
    driver,
    error::{Classify, ErrorKind},
    launcher, rbac,
    recorder::{self, Recorder},
    secrets::{self, Provider},
    topology::{self, Topology},
};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::{batch::v1::Job, core::v1::Namespace},
    kube::{
        self,
        api::{DeleteParams, ObjectMeta, PostParams},
        runtime::{controller::Action, reflector::ObjectRef},
        Api, ResourceExt,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{config::ControllerConfig, metrics::Metrics};

pub const CURATOR_CONTROLLER_NAME: &str = "clustercurator";
pub const CURATOR_FULL_CONTROLLER_NAME: &str =
    "clustercurator.cluster.open-cluster-management.io";

/// The curation-relevant part of a record as last seen by the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub struct CurationSnapshot {
    pub generation: Option<i64>,
    pub desired: DesiredCuration,
    pub curating_job: Option<String>,
    pub retry_posthook: Option<String>,
}

impl CurationSnapshot {
    pub fn of(curator: &ClusterCurator) -> Self {
        Self {
            generation: curator.metadata.generation,
            desired: curator.spec.desired_curation,
            curating_job: curator.curating_job().map(str::to_string),
            retry_posthook: curator.retry_posthook().map(str::to_string),
        }
    }
}

/// Whether a change to a record may start work.
///
/// Status-only writes and the reconciler's own bookkeeping (setting or clearing
/// `curatingJob`, clearing `desiredCuration`) are dropped. Records seen for the
/// first time are always let through.
pub fn accepts(previous: Option<&CurationSnapshot>, current: &CurationSnapshot) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if previous.generation.is_some() && previous.generation == current.generation {
        return false;
    }
    let requested = !current.desired.is_idle() && current.curating_job.is_none();
    let retry_requested =
        current.retry_posthook.is_some() && current.retry_posthook != previous.retry_posthook;
    let delete_namespace = current.desired == DesiredCuration::DeleteClusterNamespace;
    requested || retry_requested || delete_namespace
}

/// What the reconciler does with an accepted record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Plan {
    DeleteNamespace,
    /// Nothing is requested, or a curating Job already owns the record.
    Idle,
    Launch { posthook_only: bool },
}

pub fn plan(curator: &ClusterCurator) -> Plan {
    let curation = curator.spec.desired_curation;
    if curation == DesiredCuration::DeleteClusterNamespace {
        return Plan::DeleteNamespace;
    }
    let posthook_only = curator.is_posthook_only();
    if !posthook_only && (curator.curating_job().is_some() || curation.is_idle()) {
        return Plan::Idle;
    }
    Plan::Launch { posthook_only }
}

#[derive(Debug)]
pub enum Launch {
    Create(Job),
    /// The request can never run as asked. The message is recorded on the
    /// clustercurator-job condition and the record is left alone.
    Reject(String),
}

pub fn prepare_launch(
    curator: &ClusterCurator,
    image_uri: &str,
    posthook_only: bool,
    topology: Topology,
    provider: Provider,
) -> Result<Launch> {
    let curation = curator.spec.desired_curation;
    match launcher::pipeline(curation, posthook_only, topology, provider)
        .and_then(|stages| launcher::build_job(curator, image_uri, &stages))
    {
        Ok(job) => Ok(Launch::Create(job)),
        Err(error) if error.kind() == ErrorKind::Validation => {
            Ok(Launch::Reject(error.to_string()))
        }
        Err(error) => Err(error).context(BuildJobSnafu),
    }
}

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub config: ControllerConfig,
    pub metrics: Arc<Metrics>,
    snapshots: Mutex<HashMap<ObjectRef<ClusterCurator>, CurationSnapshot>>,
}

impl Ctx {
    pub fn new(
        client: stackable_operator::client::Client,
        config: ControllerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            config,
            metrics,
            snapshots: Mutex::default(),
        }
    }

    fn previous(&self, key: &ObjectRef<ClusterCurator>) -> Option<CurationSnapshot> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|snapshots| snapshots.get(key).cloned())
    }

    fn remember(&self, key: ObjectRef<ClusterCurator>, snapshot: CurationSnapshot) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.insert(key, snapshot);
        }
    }

    fn forget(&self, key: &ObjectRef<ClusterCurator>) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.remove(key);
        }
    }
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("ClusterCurator has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to fetch ClusterCurator {namespace}/{name}"))]
    GetCurator {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to detect the cluster topology"))]
    DetectTopology { source: topology::Error },

    #[snafu(display("failed to check whether the cluster needs an upgrade"))]
    CheckUpgrade { source: driver::Error },

    #[snafu(display("failed to ensure worker RBAC in namespace {namespace}"))]
    EnsureRbac {
        source: rbac::Error,
        namespace: String,
    },

    #[snafu(display("failed to create namespace {name}"))]
    CreateNamespace { source: kube::Error, name: String },

    #[snafu(display("failed to resolve the cloud provider of the credential"))]
    ResolveProvider { source: secrets::Error },

    #[snafu(display("failed to build the pipeline Job"))]
    BuildJob { source: launcher::Error },

    #[snafu(display("failed to create the pipeline Job in namespace {namespace}"))]
    CreateJob {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("failed to mark Job {job} as the curating job"))]
    ClaimCurator {
        source: recorder::Error,
        job: String,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_curator(curator: Arc<ClusterCurator>, ctx: Arc<Ctx>) -> Result<Action> {
    tracing::info!("Starting reconcile");
    ctx.metrics.reconciled();

    let key = ObjectRef::from_obj(&*curator);
    let namespace = curator.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let name = curator.name_any();
    let kube_client = ctx.client.as_kube_client();

    // The cache may lag behind the worker's writes.
    let curators: Api<ClusterCurator> = Api::namespaced(kube_client.clone(), &namespace);
    let Some(curator) = curators.get_opt(&name).await.context(GetCuratorSnafu {
        namespace: &namespace,
        name: &name,
    })?
    else {
        ctx.forget(&key);
        return Ok(Action::await_change());
    };

    let snapshot = CurationSnapshot::of(&curator);
    if !accepts(ctx.previous(&key).as_ref(), &snapshot) {
        tracing::debug!(cluster = %name, "change does not request a curation");
        ctx.metrics.event_filtered();
        ctx.remember(key, snapshot);
        return Ok(Action::await_change());
    }

    let action = curate(&curator, &namespace, &ctx).await?;
    ctx.remember(key, snapshot);
    Ok(action)
}

async fn curate(curator: &ClusterCurator, namespace: &str, ctx: &Ctx) -> Result<Action> {
    let kube_client = ctx.client.as_kube_client();
    let cluster = curator.cluster_name();
    let curation = curator.spec.desired_curation;

    let posthook_only = match plan(curator) {
        Plan::DeleteNamespace => {
            delete_namespace(kube_client, namespace).await;
            return Ok(Action::await_change());
        }
        Plan::Idle => {
            tracing::debug!(
                cluster = %cluster,
                curating_job = curator.curating_job(),
                "no curation to start"
            );
            return Ok(Action::await_change());
        }
        Plan::Launch { posthook_only } => posthook_only,
    };

    let topology = topology::detect(kube_client.clone(), curator)
        .await
        .context(DetectTopologySnafu)?;
    let recorder = Recorder::for_curator(kube_client.clone(), curator);

    if curation == DesiredCuration::Upgrade && !posthook_only {
        let driver = driver::for_topology(kube_client.clone(), recorder.clone(), curator, topology);
        if !driver
            .need_to_upgrade(curator)
            .await
            .context(CheckUpgradeSnafu)?
        {
            tracing::info!(cluster = %cluster, "cluster already runs the desired version");
            return Ok(Action::await_change());
        }
    }

    rbac::ensure(kube_client.clone(), namespace)
        .await
        .context(EnsureRbacSnafu { namespace })?;

    if curator.is_hosted_shape() {
        ensure_namespace(kube_client.clone(), &cluster).await?;
        rbac::ensure(kube_client.clone(), &cluster)
            .await
            .context(EnsureRbacSnafu { namespace: &cluster })?;
    }

    let provider = if curation == DesiredCuration::Install && !posthook_only {
        secrets::resolve_provider(
            kube_client.clone(),
            curator.spec.provider_credential_path.as_deref(),
        )
        .await
        .context(ResolveProviderSnafu)?
    } else {
        Provider::Ansible
    };

    let job = match prepare_launch(curator, &ctx.config.image_uri, posthook_only, topology, provider)? {
        Launch::Create(job) => job,
        Launch::Reject(message) => {
            tracing::warn!(cluster = %cluster, %curation, reason = %message, "curation cannot be launched");
            ctx.metrics.launch_rejected();
            recorder.failed(CLUSTERCURATOR_JOB, message).await;
            return Ok(Action::await_change());
        }
    };

    let job_namespace = job.namespace().unwrap_or_else(|| namespace.to_string());
    let job = Api::<Job>::namespaced(kube_client, &job_namespace)
        .create(&PostParams::default(), &job)
        .await
        .context(CreateJobSnafu {
            namespace: &job_namespace,
        })?;
    let job_name = job.name_any();
    ctx.metrics.job_launched();
    tracing::info!(cluster = %cluster, job = %job_name, %curation, "created pipeline Job");

    recorder
        .claim(&job_name)
        .await
        .context(ClaimCuratorSnafu { job: &job_name })?;
    recorder
        .started(
            CLUSTERCURATOR_JOB,
            format!("curator-job {job_name} running {curation}"),
        )
        .await;

    Ok(Action::await_change())
}

/// Best effort: a failed delete is logged and not retried.
async fn delete_namespace(client: kube::Client, namespace: &str) {
    tracing::info!(%namespace, "deleting cluster namespace");
    let namespaces: Api<Namespace> = Api::all(client);
    if let Err(error) = namespaces.delete(namespace, &DeleteParams::default()).await {
        tracing::warn!(
            error = &error as &dyn std::error::Error,
            %namespace,
            "failed to delete cluster namespace"
        );
    }
}

async fn ensure_namespace(client: kube::Client, name: &str) -> Result<()> {
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };
    match Api::<Namespace>::all(client)
        .create(&PostParams::default(), &namespace)
        .await
    {
        Ok(_) => {
            tracing::info!(namespace = %name, "created hosted cluster namespace");
            Ok(())
        }
        Err(kube::Error::Api(response)) if response.code == 409 => Ok(()),
        Err(source) => Err(source).context(CreateNamespaceSnafu { name }),
    }
}

pub fn error_policy(_obj: Arc<ClusterCurator>, _error: &Error, ctx: Arc<Ctx>) -> Action {
    ctx.metrics.reconcile_failed();
    Action::requeue(Duration::from_secs(5))
}
