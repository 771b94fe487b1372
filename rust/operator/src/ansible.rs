//! Runs pre- and post-hooks as Ansible Tower jobs.

use std::time::Duration;

use cluster_curator_crd::{
    ansible::{AnsibleJob, AnsibleJobSpec, REASON_FAILED, RESULT_ERROR, RESULT_SUCCESSFUL},
    conditions::{self, CURRENT_ANSIBLE_JOB, POSTHOOK_ANSIBLEJOB, PREHOOK_ANSIBLEJOB},
    Hook, TOWER_ACCESS_SECRET,
};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    kube::{self, api::PostParams, Api},
};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{Classify, ErrorKind},
    recorder::Recorder,
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// One hour of polling at [`POLL_INTERVAL`].
pub const MONITOR_ATTEMPTS: u32 = 720;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to create AnsibleJob for hook {hook:?}"))]
    CreateJob { source: kube::Error, hook: String },

    #[snafu(display("created AnsibleJob for hook {hook:?} has no name"))]
    UnnamedJob { hook: String },

    #[snafu(display("failed to read AnsibleJob {name}"))]
    GetJob { source: kube::Error, name: String },

    #[snafu(display("AnsibleJob {name} for hook {hook:?} failed: {message}"))]
    JobFailed {
        hook: String,
        name: String,
        message: String,
    },

    #[snafu(display("timed out waiting for AnsibleJob {name} for hook {hook:?}"))]
    TimedOut { hook: String, name: String },

    #[snafu(display("{phase} hooks are not supported for this curation"))]
    PhaseNotSupported { phase: HookPhase },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::CreateJob { source, .. } | Error::GetJob { source, .. } => source.kind(),
            Error::UnnamedJob { .. } => ErrorKind::Transient,
            Error::JobFailed { .. } => ErrorKind::RemoteOperator,
            Error::TimedOut { .. } => ErrorKind::Timeout,
            Error::PhaseNotSupported { .. } => ErrorKind::Validation,
        }
    }
}

/// Which side of the operation a hook list runs on, passed to hook stages as `JOB_TYPE`.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum HookPhase {
    Prehook,
    Posthook,
}

impl HookPhase {
    pub fn condition_type(&self) -> &'static str {
        match self {
            HookPhase::Prehook => PREHOOK_ANSIBLEJOB,
            HookPhase::Posthook => POSTHOOK_ANSIBLEJOB,
        }
    }

    pub fn name_prefix(&self) -> &'static str {
        match self {
            HookPhase::Prehook => "prehookjob-",
            HookPhase::Posthook => "posthookjob-",
        }
    }
}

/// Where an AnsibleJob is in its life.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    /// The resource operator has not picked the job up yet.
    Init,
    Running { k8s_job: Option<String> },
    Failed { message: String },
    Succeeded,
}

pub fn job_state(job: &AnsibleJob) -> JobState {
    let Some(status) = &job.status else {
        return JobState::Init;
    };
    let Some(conditions) = &status.conditions else {
        return JobState::Init;
    };

    let result = status
        .ansible_job_result
        .as_ref()
        .map(|r| r.status.as_str())
        .unwrap_or_default();
    let failed_condition = conditions
        .iter()
        .find(|c| c.reason.as_deref() == Some(REASON_FAILED));

    if result == RESULT_ERROR || failed_condition.is_some() {
        let message = failed_condition
            .map(|c| c.message().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| status.k8s_job.as_ref().and_then(|k| k.message.clone()))
            .unwrap_or_else(|| "AnsibleJob reported an error".to_string());
        return JobState::Failed { message };
    }
    if result == RESULT_SUCCESSFUL {
        return JobState::Succeeded;
    }
    JobState::Running {
        k8s_job: status
            .k8s_job
            .as_ref()
            .map(|k| k.namespaced_name.clone())
            .filter(|n| !n.is_empty()),
    }
}

/// Merges the cluster identity into the hook's variables; keys set by the
/// hook win.
pub fn extra_vars(hook: &Hook, cluster: &str, namespace: &str) -> serde_json::Value {
    let mut vars = json!({
        "cluster_deployment": { "name": cluster, "namespace": namespace },
    });
    if let (Some(target), Some(serde_json::Value::Object(user))) =
        (vars.as_object_mut(), hook.extra_vars.as_ref())
    {
        for (key, value) in user {
            target.insert(key.clone(), value.clone());
        }
    }
    vars
}

pub fn build_job(hook: &Hook, phase: HookPhase, cluster: &str, namespace: &str) -> AnsibleJob {
    let (job_template_name, workflow_template_name) = if hook.hook_type.is_workflow() {
        (None, Some(hook.name.clone()))
    } else {
        (Some(hook.name.clone()), None)
    };
    AnsibleJob {
        metadata: ObjectMeta {
            generate_name: Some(phase.name_prefix().to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: AnsibleJobSpec {
            job_template_name,
            workflow_template_name,
            tower_auth_secret: TOWER_ACCESS_SECRET.to_string(),
            extra_vars: Some(extra_vars(hook, cluster, namespace)),
        },
        status: None,
    }
}

pub struct HookRunner {
    api: Api<AnsibleJob>,
    recorder: Recorder,
    cluster: String,
    namespace: String,
    attempts: u32,
}

impl HookRunner {
    pub fn new(client: kube::Client, recorder: Recorder, cluster: &str, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            recorder,
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            attempts: MONITOR_ATTEMPTS,
        }
    }

    /// Runs `hooks` in order and stops at the first one that does not succeed.
    pub async fn run_all(&self, phase: HookPhase, hooks: &[Hook]) -> Result<()> {
        let phase_condition = phase.condition_type();
        if hooks.is_empty() {
            tracing::info!(%phase, cluster = %self.cluster, "no hooks to run");
            self.recorder
                .finished(phase_condition, format!("no {phase} to run"))
                .await;
            return Ok(());
        }

        self.recorder
            .started(phase_condition, format!("running {} {phase}(s)", hooks.len()))
            .await;
        for hook in hooks {
            if let Err(error) = self.run(phase, hook).await {
                self.recorder.failed(phase_condition, error.to_string()).await;
                return Err(error);
            }
        }
        self.recorder
            .finished(phase_condition, format!("all {phase}s completed"))
            .await;
        Ok(())
    }

    async fn run(&self, phase: HookPhase, hook: &Hook) -> Result<()> {
        let condition_type = conditions::hook_condition_type(phase.condition_type(), &hook.name);
        let job = build_job(hook, phase, &self.cluster, &self.namespace);
        let created = self
            .api
            .create(&PostParams::default(), &job)
            .await
            .with_context(|_| CreateJobSnafu { hook: &hook.name })?;
        let name = created.metadata.name.clone().context(UnnamedJobSnafu {
            hook: &hook.name,
        })?;
        tracing::info!(hook = %hook.name, job = %name, %phase, "created AnsibleJob");
        self.recorder
            .started(&condition_type, format!("AnsibleJob {}/{name}", self.namespace))
            .await;

        let outcome = self.monitor(hook, &name).await;
        match &outcome {
            Ok(()) => {
                self.recorder
                    .finished(&condition_type, format!("AnsibleJob {}/{name}", self.namespace))
                    .await
            }
            Err(error) => self.recorder.failed(&condition_type, error.to_string()).await,
        }
        outcome
    }

    async fn monitor(&self, hook: &Hook, name: &str) -> Result<()> {
        let mut current_k8s_job = None::<String>;
        for attempt in 1..=self.attempts {
            let job = self.api.get(name).await.context(GetJobSnafu { name })?;
            match job_state(&job) {
                JobState::Init => {
                    tracing::debug!(job = name, attempt, "AnsibleJob not started yet");
                }
                JobState::Running { k8s_job } => {
                    if k8s_job.is_some() && k8s_job != current_k8s_job {
                        let k8s_job_name = k8s_job.clone().unwrap_or_default();
                        tracing::info!(job = name, k8s_job = %k8s_job_name, "AnsibleJob is running");
                        self.recorder
                            .started(CURRENT_ANSIBLE_JOB, k8s_job_name)
                            .await;
                        current_k8s_job = k8s_job;
                    }
                }
                JobState::Failed { message } => {
                    return JobFailedSnafu {
                        hook: &hook.name,
                        name,
                        message,
                    }
                    .fail();
                }
                JobState::Succeeded => {
                    tracing::info!(hook = %hook.name, job = name, "AnsibleJob succeeded");
                    return Ok(());
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        TimedOutSnafu {
            hook: &hook.name,
            name,
        }
        .fail()
    }
}
