//! Drives classic clusters through Hive's `ClusterDeployment`.

use std::time::{Duration, Instant};

use cluster_curator_crd::{
    conditions::{
        find_observed, HIVE_DESTROYING_JOB, HIVE_INSTALLING_JOB, HIVE_PROVISIONING_JOB,
    },
    hive::{
        provision_job_name, uninstall_job_name, ClusterDeployment, CONDITION_PROVISION_STOPPED,
        CONDITION_REQUIREMENTS_MET, RECONCILE_PAUSE_ANNOTATION,
    },
};
use serde_json::json;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::batch::v1::Job,
    kube::{
        self,
        api::{DeleteParams, Patch, PatchParams},
        Api,
    },
};

use crate::{
    error::{Classify, ErrorKind},
    recorder::Recorder,
    retry,
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Two hours of polling at [`JOB_POLL_INTERVAL`].
pub const JOB_MONITOR_ATTEMPTS: u32 = 720;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read ClusterDeployment {namespace}/{name}"))]
    GetClusterDeployment {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("ClusterDeployment {namespace}/{name} not found"))]
    ClusterDeploymentNotFound { namespace: String, name: String },

    #[snafu(display("failed to un-pause ClusterDeployment {namespace}/{name}"))]
    Activate {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to delete ClusterDeployment {namespace}/{name}"))]
    DeleteClusterDeployment {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to read Job {namespace}/{name}"))]
    GetJob {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("ClusterDeployment {name} failed: {reason}"))]
    ProvisionFailed { name: String, reason: String },

    #[snafu(display("Job {name} failed"))]
    JobFailed { name: String },

    #[snafu(display("Timed out waiting for job {name}"))]
    TimedOut { name: String },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetClusterDeployment { source, .. }
            | Error::Activate { source, .. }
            | Error::DeleteClusterDeployment { source, .. }
            | Error::GetJob { source, .. } => source.kind(),
            Error::ClusterDeploymentNotFound { .. } => ErrorKind::Validation,
            Error::ProvisionFailed { .. } | Error::JobFailed { .. } => ErrorKind::RemoteOperator,
            Error::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

/// What a ClusterDeployment says about its installation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstallProgress {
    Installed { web_console_url: String },
    Provisioning { job: String },
    Failed { reason: String },
    Pending,
}

pub fn install_progress(cluster_deployment: &ClusterDeployment) -> InstallProgress {
    if let Some(url) = cluster_deployment.web_console_url() {
        return InstallProgress::Installed {
            web_console_url: url.to_string(),
        };
    }
    if let Some(provision) = cluster_deployment.provision_name() {
        return InstallProgress::Provisioning {
            job: provision_job_name(provision),
        };
    }
    let conditions = cluster_deployment.observed_conditions();
    if let Some(stopped) =
        find_observed(conditions, CONDITION_PROVISION_STOPPED).filter(|c| c.is_true())
    {
        return InstallProgress::Failed {
            reason: format!("{CONDITION_PROVISION_STOPPED}: {}", stopped.message()),
        };
    }
    if let Some(unmet) =
        find_observed(conditions, CONDITION_REQUIREMENTS_MET).filter(|c| c.is_false())
    {
        return InstallProgress::Failed {
            reason: format!("{CONDITION_REQUIREMENTS_MET}=False: {}", unmet.message()),
        };
    }
    InstallProgress::Pending
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

/// A Job is over once it carries a true `Complete` or `Failed` condition.
pub fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = &job.status else {
        return JobOutcome::Running;
    };
    let terminal = status.conditions.iter().flatten().any(|c| {
        (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True"
    });
    if !terminal {
        JobOutcome::Running
    } else if status.succeeded.unwrap_or_default() > 0 {
        JobOutcome::Succeeded
    } else {
        JobOutcome::Failed
    }
}

/// The install conditions a watched provision Job settles, and how.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Settled {
    conditions: [&'static str; 2],
    succeeded: bool,
    message: String,
}

fn provision_job_settled(job: &str, watched: &Result<()>) -> Settled {
    let (succeeded, message) = match watched {
        Ok(()) => (true, format!("Job {job} completed")),
        Err(error) => (false, error.to_string()),
    };
    Settled {
        conditions: [HIVE_INSTALLING_JOB, HIVE_PROVISIONING_JOB],
        succeeded,
        message,
    }
}

pub struct Hive {
    cluster_deployments: Api<ClusterDeployment>,
    jobs: Api<Job>,
    recorder: Recorder,
    cluster: String,
    namespace: String,
}

impl Hive {
    /// The ClusterDeployment and its Jobs live in the cluster's own namespace.
    pub fn new(client: kube::Client, recorder: Recorder, cluster: &str) -> Self {
        Self {
            cluster_deployments: Api::namespaced(client.clone(), cluster),
            jobs: Api::namespaced(client, cluster),
            recorder,
            cluster: cluster.to_string(),
            namespace: cluster.to_string(),
        }
    }

    async fn get_cluster_deployment(&self) -> Result<Option<ClusterDeployment>> {
        self.cluster_deployments
            .get_opt(&self.cluster)
            .await
            .context(GetClusterDeploymentSnafu {
                namespace: &self.namespace,
                name: &self.cluster,
            })
    }

    /// Removes the reconcile-pause annotation so Hive starts provisioning.
    pub async fn activate(&self) -> Result<()> {
        let Some(cluster_deployment) = self.get_cluster_deployment().await? else {
            return ClusterDeploymentNotFoundSnafu {
                namespace: &self.namespace,
                name: &self.cluster,
            }
            .fail();
        };
        if !cluster_deployment.is_paused() {
            tracing::info!(cluster = %self.cluster, "ClusterDeployment is not paused");
            return Ok(());
        }
        let patch = json!({
            "metadata": { "annotations": { RECONCILE_PAUSE_ANNOTATION: null } }
        });
        retry::on_conflict("un-pause ClusterDeployment", || async {
            self.cluster_deployments
                .patch(&self.cluster, &PatchParams::default(), &Patch::Merge(&patch))
                .await
        })
        .await
        .context(ActivateSnafu {
            namespace: &self.namespace,
            name: &self.cluster,
        })?;
        tracing::info!(cluster = %self.cluster, "un-paused ClusterDeployment");
        Ok(())
    }

    /// Waits for the install to finish, following the provision Job once Hive
    /// has started one.
    pub async fn monitor_install(&self, attempts: u32) -> Result<()> {
        for attempt in 1..=attempts {
            let Some(cluster_deployment) = self.get_cluster_deployment().await? else {
                return ClusterDeploymentNotFoundSnafu {
                    namespace: &self.namespace,
                    name: &self.cluster,
                }
                .fail();
            };
            match install_progress(&cluster_deployment) {
                InstallProgress::Installed { web_console_url } => {
                    tracing::info!(cluster = %self.cluster, %web_console_url, "cluster installed");
                    self.recorder
                        .finished(HIVE_PROVISIONING_JOB, web_console_url)
                        .await;
                    return Ok(());
                }
                InstallProgress::Provisioning { job } => {
                    if self.find_job(&job).await?.is_some() {
                        self.recorder
                            .started(HIVE_INSTALLING_JOB, format!("Installing with Job {job}"))
                            .await;
                        let watched = self.watch_job(&job).await;
                        let settled = provision_job_settled(&job, &watched);
                        for condition_type in settled.conditions {
                            if settled.succeeded {
                                self.recorder
                                    .finished(condition_type, settled.message.clone())
                                    .await;
                            } else {
                                self.recorder
                                    .failed(condition_type, settled.message.clone())
                                    .await;
                            }
                        }
                        return watched;
                    }
                    tracing::debug!(cluster = %self.cluster, %job, "provision Job not created yet");
                }
                InstallProgress::Failed { reason } => {
                    self.recorder.failed(HIVE_PROVISIONING_JOB, reason.clone()).await;
                    return ProvisionFailedSnafu {
                        name: &self.cluster,
                        reason,
                    }
                    .fail();
                }
                InstallProgress::Pending => {
                    tracing::debug!(cluster = %self.cluster, attempt, "waiting for provisioning to start");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu {
            name: format!("{}/{}", self.namespace, self.cluster),
        }
        .fail()
    }

    pub async fn destroy(&self) -> Result<()> {
        match self
            .cluster_deployments
            .delete(&self.cluster, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                tracing::info!(cluster = %self.cluster, "deleted ClusterDeployment");
                Ok(())
            }
            Err(error) if retry::is_not_found(&error) => {
                tracing::info!(cluster = %self.cluster, "ClusterDeployment already gone");
                Ok(())
            }
            Err(source) => Err(Error::DeleteClusterDeployment {
                source,
                namespace: self.namespace.clone(),
                name: self.cluster.clone(),
            }),
        }
    }

    /// Waits for the uninstall to finish; a missing ClusterDeployment counts
    /// as destroyed.
    pub async fn monitor_destroy(&self, attempts: u32) -> Result<()> {
        let job = uninstall_job_name(&self.cluster);
        for attempt in 1..=attempts {
            if self.get_cluster_deployment().await?.is_none() {
                self.recorder
                    .finished(HIVE_DESTROYING_JOB, "ClusterDeployment removed")
                    .await;
                return Ok(());
            }
            if self.find_job(&job).await?.is_some() {
                self.recorder
                    .started(HIVE_DESTROYING_JOB, format!("Destroying with Job {job}"))
                    .await;
                if let Err(error) = self.watch_job(&job).await {
                    self.recorder.failed(HIVE_DESTROYING_JOB, error.to_string()).await;
                    return Err(error);
                }
                self.recorder
                    .finished(HIVE_DESTROYING_JOB, format!("Job {job} completed"))
                    .await;
                return Ok(());
            }
            tracing::debug!(cluster = %self.cluster, %job, attempt, "uninstall Job not created yet");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu { name: job }.fail()
    }

    async fn find_job(&self, name: &str) -> Result<Option<Job>> {
        self.jobs.get_opt(name).await.context(GetJobSnafu {
            namespace: &self.namespace,
            name,
        })
    }

    async fn watch_job(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        for _ in 0..JOB_MONITOR_ATTEMPTS {
            let Some(job) = self.find_job(name).await? else {
                tracing::debug!(job = name, "Job not visible yet");
                tokio::time::sleep(JOB_POLL_INTERVAL).await;
                continue;
            };
            match job_outcome(&job) {
                JobOutcome::Succeeded => {
                    tracing::info!(job = name, "Job succeeded");
                    return Ok(());
                }
                JobOutcome::Failed => return JobFailedSnafu { name }.fail(),
                JobOutcome::Running => {
                    let active = job.status.as_ref().and_then(|s| s.active).unwrap_or_default();
                    tracing::info!(
                        job = name,
                        active,
                        elapsed_minutes = started.elapsed().as_secs() / 60,
                        "Job is running"
                    );
                }
            }
            tokio::time::sleep(JOB_POLL_INTERVAL).await;
        }
        TimedOutSnafu { name }.fail()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn cluster_deployment(status: &str) -> ClusterDeployment {
        let yaml = format!(
            "{}{status}",
            indoc! {"
                apiVersion: hive.openshift.io/v1
                kind: ClusterDeployment
                metadata:
                  name: c1
                  namespace: c1
                  annotations:
                    hive.openshift.io/reconcile-pause: 'true'
                spec:
                  clusterName: c1
                  baseDomain: example.com
            "}
        );
        serde_yaml::from_str(&yaml).expect("invalid test input")
    }

    #[test]
    fn installed_once_console_is_up() {
        let cd = cluster_deployment(indoc! {"
            status:
              webConsoleURL: https://console-openshift-console.apps.c1.example.com
              provisionRef:
                name: c1-0-abcde
        "});
        assert!(cd.is_paused());
        assert_eq!(
            install_progress(&cd),
            InstallProgress::Installed {
                web_console_url: "https://console-openshift-console.apps.c1.example.com"
                    .to_string()
            }
        );
    }

    #[test]
    fn follows_the_provision_job() {
        let cd = cluster_deployment(indoc! {"
            status:
              provisionRef:
                name: c1-0-abcde
        "});
        assert_eq!(
            install_progress(&cd),
            InstallProgress::Provisioning {
                job: "c1-0-abcde-provision".to_string()
            }
        );
    }

    #[rstest]
    #[case("ProvisionStopped", "True")]
    #[case("RequirementsMet", "False")]
    fn fails_fast_on_blocking_conditions(#[case] type_: &str, #[case] status: &str) {
        let cd = cluster_deployment(&format!(
            "status:\n  conditions:\n    - type: {type_}\n      status: '{status}'\n      message: quota\n"
        ));
        assert!(matches!(install_progress(&cd), InstallProgress::Failed { .. }));
    }

    #[test]
    fn pending_without_signals() {
        let cd = cluster_deployment(indoc! {"
            status:
              conditions:
                - type: RequirementsMet
                  status: 'True'
                - type: ProvisionStopped
                  status: 'False'
        "});
        assert_eq!(install_progress(&cd), InstallProgress::Pending);
        assert_eq!(install_progress(&cluster_deployment("")), InstallProgress::Pending);
    }

    fn job(status: &str) -> Job {
        let yaml = format!(
            "{}{status}",
            indoc! {"
                apiVersion: batch/v1
                kind: Job
                metadata:
                  name: c1-0-abcde-provision
                  namespace: c1
            "}
        );
        serde_yaml::from_str(&yaml).expect("invalid test input")
    }

    #[test]
    fn job_outcomes() {
        assert_eq!(job_outcome(&job("")), JobOutcome::Running);
        assert_eq!(job_outcome(&job("status:\n  active: 1\n")), JobOutcome::Running);
        assert_eq!(
            job_outcome(&job(indoc! {"
                status:
                  succeeded: 1
                  conditions:
                    - type: Complete
                      status: 'True'
            "})),
            JobOutcome::Succeeded
        );
        assert_eq!(
            job_outcome(&job(indoc! {"
                status:
                  failed: 1
                  conditions:
                    - type: Failed
                      status: 'True'
            "})),
            JobOutcome::Failed
        );
    }

    #[rstest]
    #[case::completed(Ok(()), true, "Job c1-0-abcde-provision completed")]
    #[case::failed(
        JobFailedSnafu { name: "c1-0-abcde-provision" }.fail(),
        false,
        "Job c1-0-abcde-provision failed"
    )]
    #[case::timed_out(
        TimedOutSnafu { name: "c1-0-abcde-provision" }.fail(),
        false,
        "Timed out waiting for job c1-0-abcde-provision"
    )]
    fn provision_job_settles_both_install_conditions(
        #[case] watched: Result<()>,
        #[case] succeeded: bool,
        #[case] message: &str,
    ) {
        assert_eq!(
            provision_job_settled("c1-0-abcde-provision", &watched),
            Settled {
                conditions: [HIVE_INSTALLING_JOB, HIVE_PROVISIONING_JOB],
                succeeded,
                message: message.to_string(),
            }
        );
    }
}
