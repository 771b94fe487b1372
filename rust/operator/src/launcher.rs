//! Renders a curation into the pipeline Job: one init container per stage,
//! run in order, followed by the `done` container.

use std::collections::BTreeMap;

use cluster_curator_crd::{v1beta1::ClusterCurator, DesiredCuration, APP_NAME, WORKER_SERVICE_ACCOUNT};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{meta::ObjectMetaBuilder, pod::container::ContainerBuilder},
    k8s_openapi::api::{
        batch::v1::{Job, JobSpec},
        core::v1::{Container, PodSpec, PodTemplateSpec},
    },
    kube::ResourceExt,
};

use crate::{
    error::{Classify, ErrorKind},
    secrets::Provider,
    stage::Stage,
    topology::Topology,
};

pub const JOB_GENERATE_NAME: &str = "curator-job-";
const WORKER_COMMAND: &str = "./curator";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("there is nothing to launch for curation {curation:?}"))]
    NothingToLaunch { curation: DesiredCuration },

    #[snafu(display("only hosted clusters can be detached"))]
    DetachNotSupported,

    #[snafu(display("destroy does not run post-hooks"))]
    PosthooksNotAllowed,

    #[snafu(display("invalid container name for stage {stage}"))]
    InvalidContainerName {
        source: stackable_operator::builder::pod::container::Error,
        stage: Stage,
    },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("overrideJob of curation {curation} is not a valid Job"))]
    DecodeOverrideJob {
        source: serde_json::Error,
        curation: DesiredCuration,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::ObjectMissingMetadataForOwnerRef { .. } => ErrorKind::Transient,
            _ => ErrorKind::Validation,
        }
    }
}

/// The ordered stages of a curation, without the trailing `done`.
pub fn pipeline(
    curation: DesiredCuration,
    posthook_only: bool,
    topology: Topology,
    provider: Provider,
) -> Result<Vec<Stage>> {
    if posthook_only {
        return match curation {
            DesiredCuration::Destroy => PosthooksNotAllowedSnafu.fail(),
            DesiredCuration::Idle | DesiredCuration::DeleteClusterNamespace => {
                NothingToLaunchSnafu { curation }.fail()
            }
            _ => Ok(vec![Stage::PosthookAnsibleJob]),
        };
    }
    let stages = match curation {
        DesiredCuration::Install => vec![
            Stage::apply_cloud_provider(provider),
            Stage::PrehookAnsibleJob,
            Stage::ActivateAndMonitor,
            Stage::MonitorImport,
            Stage::PosthookAnsibleJob,
        ],
        DesiredCuration::Upgrade => vec![
            Stage::PrehookAnsibleJob,
            Stage::UpgradeCluster,
            Stage::MonitorUpgrade,
            Stage::PosthookAnsibleJob,
        ],
        DesiredCuration::Scale => vec![Stage::PrehookAnsibleJob, Stage::PosthookAnsibleJob],
        DesiredCuration::Destroy => vec![
            Stage::PrehookAnsibleJob,
            Stage::DestroyCluster,
            Stage::MonitorDestroy,
        ],
        DesiredCuration::Detach => match topology {
            Topology::Hosted => vec![Stage::DetachCluster],
            Topology::Classic => return DetachNotSupportedSnafu.fail(),
        },
        DesiredCuration::Idle | DesiredCuration::DeleteClusterNamespace => {
            return NothingToLaunchSnafu { curation }.fail()
        }
    };
    Ok(stages)
}

fn container(stage: Stage, image_uri: &str, env: &[(&str, &str)]) -> Result<Container> {
    let mut builder =
        ContainerBuilder::new(&stage.to_string()).context(InvalidContainerNameSnafu { stage })?;
    builder
        .image(image_uri)
        .command(vec![WORKER_COMMAND.to_string(), stage.to_string()]);
    for (name, value) in env {
        builder.add_env_var(*name, *value);
    }
    if let Some(phase) = stage.hook_phase() {
        builder.add_env_var("JOB_TYPE", phase.to_string());
    }
    Ok(builder.build())
}

/// Builds the pipeline Job for `curator`, or decodes its `overrideJob`.
pub fn build_job(curator: &ClusterCurator, image_uri: &str, stages: &[Stage]) -> Result<Job> {
    let curation = curator.spec.desired_curation;
    let namespace = curator.namespace().unwrap_or_default();

    if let Some(override_job) = curator.hooks_for(curation).override_job {
        let mut job: Job = serde_json::from_value(override_job.clone())
            .context(DecodeOverrideJobSnafu { curation })?;
        job.metadata.namespace.get_or_insert(namespace);
        return Ok(job);
    }

    let cluster_name = curator.cluster_name();
    let credential_path = curator
        .spec
        .provider_credential_path
        .clone()
        .unwrap_or_default();
    let env = [
        ("CLUSTER_NAME", cluster_name.as_str()),
        ("CLUSTER_NAMESPACE", namespace.as_str()),
        ("PROVIDER_CREDENTIAL_PATH", credential_path.as_str()),
        ("IMAGE_URI", image_uri),
    ];
    let init_containers = stages
        .iter()
        .map(|stage| container(*stage, image_uri, &env))
        .collect::<Result<Vec<_>>>()?;
    let done = container(Stage::Done, image_uri, &env)?;

    let labels = BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), APP_NAME.to_string()),
        ("curation".to_string(), curation.to_string()),
    ]);
    let mut metadata = ObjectMetaBuilder::new()
        .namespace(&namespace)
        .ownerreference_from_resource(curator, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .build();
    metadata.generate_name = Some(JOB_GENERATE_NAME.to_string());
    metadata.labels = Some(labels);

    Ok(Job {
        metadata,
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    service_account_name: Some(WORKER_SERVICE_ACCOUNT.to_string()),
                    restart_policy: Some("Never".to_string()),
                    init_containers: Some(init_containers),
                    containers: vec![done],
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn curator(yaml: &str) -> ClusterCurator {
        serde_yaml::from_str(yaml).expect("invalid test input")
    }

    const INSTALL: &str = indoc! {"
        apiVersion: cluster.open-cluster-management.io/v1beta1
        kind: ClusterCurator
        metadata:
          name: c1
          namespace: c1
          uid: 6f2a1c3e-0000-4000-8000-000000000001
        spec:
          desiredCuration: install
          providerCredentialPath: default/aws-creds
          install:
            prehook:
              - name: p1
                type: AnsibleJob
    "};

    fn stage_names(stages: &[Stage]) -> Vec<String> {
        stages.iter().map(Stage::to_string).collect()
    }

    #[test]
    fn install_pipeline() {
        let stages = pipeline(DesiredCuration::Install, false, Topology::Classic, Provider::Aws)
            .unwrap();
        assert_eq!(
            stage_names(&stages),
            vec![
                "applycloudprovider-aws",
                "prehook-ansiblejob",
                "activate-and-monitor",
                "monitor-import",
                "posthook-ansiblejob",
            ]
        );
    }

    #[rstest]
    #[case(DesiredCuration::Upgrade, vec!["prehook-ansiblejob", "upgrade-cluster", "monitor-upgrade", "posthook-ansiblejob"])]
    #[case(DesiredCuration::Scale, vec!["prehook-ansiblejob", "posthook-ansiblejob"])]
    #[case(DesiredCuration::Destroy, vec!["prehook-ansiblejob", "destroy-cluster", "monitor-destroy"])]
    fn operation_pipelines(#[case] curation: DesiredCuration, #[case] expected: Vec<&str>) {
        let stages = pipeline(curation, false, Topology::Classic, Provider::Ansible).unwrap();
        assert_eq!(stage_names(&stages), expected);
    }

    #[test]
    fn detach_is_hosted_only() {
        assert_eq!(
            pipeline(DesiredCuration::Detach, false, Topology::Hosted, Provider::Ansible).unwrap(),
            vec![Stage::DetachCluster]
        );
        assert!(matches!(
            pipeline(DesiredCuration::Detach, false, Topology::Classic, Provider::Ansible),
            Err(Error::DetachNotSupported)
        ));
    }

    #[test]
    fn posthook_only_pipelines() {
        assert_eq!(
            pipeline(DesiredCuration::Upgrade, true, Topology::Hosted, Provider::Ansible).unwrap(),
            vec![Stage::PosthookAnsibleJob]
        );
        assert!(matches!(
            pipeline(DesiredCuration::Destroy, true, Topology::Classic, Provider::Ansible),
            Err(Error::PosthooksNotAllowed)
        ));
    }

    #[rstest]
    #[case(DesiredCuration::Idle)]
    #[case(DesiredCuration::DeleteClusterNamespace)]
    fn nothing_to_launch(#[case] curation: DesiredCuration) {
        assert!(matches!(
            pipeline(curation, false, Topology::Classic, Provider::Ansible),
            Err(Error::NothingToLaunch { .. })
        ));
    }

    #[test]
    fn install_job_runs_every_stage_as_an_init_container() {
        let cc = curator(INSTALL);
        let stages = pipeline(DesiredCuration::Install, false, Topology::Classic, Provider::Aws)
            .unwrap();
        let job = build_job(&cc, "quay.io/stolostron/cluster-curator:2.9", &stages).unwrap();

        assert_eq!(job.metadata.generate_name.as_deref(), Some("curator-job-"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("c1"));
        let owner = &job.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "ClusterCurator");
        assert_eq!(owner.name, "c1");

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("cluster-installer"));

        let init = pod.init_containers.unwrap();
        assert_eq!(init.len(), 5);
        assert_eq!(
            init[1].command.as_ref().unwrap(),
            &vec!["./curator".to_string(), "prehook-ansiblejob".to_string()]
        );
        let env = |container: &Container, name: &str| {
            container
                .env
                .iter()
                .flatten()
                .find(|var| var.name == name)
                .and_then(|var| var.value.clone())
        };
        assert_eq!(env(&init[0], "CLUSTER_NAME").as_deref(), Some("c1"));
        assert_eq!(
            env(&init[0], "PROVIDER_CREDENTIAL_PATH").as_deref(),
            Some("default/aws-creds")
        );
        assert_eq!(env(&init[0], "JOB_TYPE"), None);
        assert_eq!(env(&init[1], "JOB_TYPE").as_deref(), Some("prehook"));
        assert_eq!(env(&init[4], "JOB_TYPE").as_deref(), Some("posthook"));

        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "done");
    }

    #[test]
    fn override_job_replaces_the_pipeline() {
        let yaml = format!(
            "{INSTALL}    overrideJob:\n      apiVersion: batch/v1\n      kind: Job\n      metadata:\n        name: custom\n      spec:\n        template:\n          spec:\n            containers:\n              - name: custom\n                image: busybox\n"
        );
        let cc = curator(&yaml);
        let job = build_job(&cc, "unused", &[Stage::PrehookAnsibleJob]).unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("custom"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("c1"));
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("busybox"));
        assert!(pod.init_containers.is_none());
    }
}
