use std::path::Path;

use cluster_curator_operator::{
    ansible::HookPhase,
    stage::{Stage, StageContext},
};
use snafu::{OptionExt, Snafu};

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("no cluster name given, set CLUSTER_NAME"))]
    MissingClusterName,

    #[snafu(display(
        "no cluster namespace given and {SERVICE_ACCOUNT_NAMESPACE_FILE} is not readable"
    ))]
    MissingClusterNamespace,
}

#[derive(clap::Parser, Debug)]
#[clap(about, author)]
pub struct WorkerArgs {
    /// The pipeline stage to run, for example `activate-and-monitor`.
    pub stage: Stage,

    #[arg(long, env)]
    pub cluster_name: Option<String>,

    /// Namespace of the ClusterCurator, defaults to the namespace of the pod.
    #[arg(long, env)]
    pub cluster_namespace: Option<String>,

    #[arg(long, env)]
    pub job_type: Option<HookPhase>,

    /// `<namespace>/<name>` of the cloud provider credential Secret.
    #[arg(long, env)]
    pub provider_credential_path: Option<String>,

    #[arg(long, env)]
    pub image_uri: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub stage: Stage,
    pub context: StageContext,
    pub image_uri: Option<String>,
}

impl WorkerConfig {
    pub fn from_args(args: WorkerArgs) -> Result<Self, Error> {
        Self::resolve(args, || {
            std::fs::read_to_string(Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE)).ok()
        })
    }

    fn resolve(
        args: WorkerArgs,
        pod_namespace: impl FnOnce() -> Option<String>,
    ) -> Result<Self, Error> {
        let cluster_name = non_empty(args.cluster_name).context(MissingClusterNameSnafu)?;
        let cluster_namespace = non_empty(args.cluster_namespace)
            .or_else(|| non_empty(pod_namespace().map(|ns| ns.trim().to_string())))
            .context(MissingClusterNamespaceSnafu)?;
        let job_type = args.job_type.or_else(|| args.stage.hook_phase());
        Ok(Self {
            stage: args.stage,
            context: StageContext {
                cluster_name,
                cluster_namespace,
                job_type,
                provider_credential_path: non_empty(args.provider_credential_path),
            },
            image_uri: non_empty(args.image_uri),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
