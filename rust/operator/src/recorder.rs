//! Writes conditions and ownership markers back to a [`ClusterCurator`].
//!
//! Condition writes read the record, upsert the condition and write the whole
//! list back guarded by the record's `resourceVersion`, retrying on conflict.
//! Several workers write to the same record, so a blind merge of the list would
//! drop their conditions.

use cluster_curator_crd::{
    conditions::{
        build_condition, upsert_condition, CLUSTERCURATOR_JOB, REASON_JOB_FAILED,
        REASON_JOB_HAS_FINISHED, REASON_JOB_HAS_STARTED,
    },
    v1beta1::ClusterCurator,
    FIELD_MANAGER,
};
use serde_json::json;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc},
    kube::{
        self,
        api::{Patch, PatchParams},
        Api, ResourceExt,
    },
};

use crate::{
    error::{Classify, ErrorKind},
    retry,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to write condition {condition_type:?} to ClusterCurator {namespace}/{name}"))]
    WriteCondition {
        source: kube::Error,
        condition_type: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to update the curation fields of ClusterCurator {namespace}/{name}"))]
    PatchSpec {
        source: kube::Error,
        namespace: String,
        name: String,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::WriteCondition { source, .. } | Error::PatchSpec { source, .. } => source.kind(),
        }
    }
}

#[derive(Clone)]
pub struct Recorder {
    api: Api<ClusterCurator>,
    namespace: String,
    name: String,
}

impl Recorder {
    pub fn new(client: kube::Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn for_curator(client: kube::Client, curator: &ClusterCurator) -> Self {
        let namespace = curator.namespace().unwrap_or_default();
        Self::new(client, &namespace, &curator.name_any())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get(&self) -> Result<ClusterCurator, kube::Error> {
        self.api.get(&self.name).await
    }

    /// The stage is under way.
    pub async fn started(&self, condition_type: &str, message: impl Into<String>) {
        self.record(condition_type, false, REASON_JOB_HAS_STARTED, message)
            .await
    }

    pub async fn finished(&self, condition_type: &str, message: impl Into<String>) {
        self.record(condition_type, true, REASON_JOB_HAS_FINISHED, message)
            .await
    }

    pub async fn failed(&self, condition_type: &str, message: impl Into<String>) {
        self.record(condition_type, false, REASON_JOB_FAILED, message)
            .await
    }

    /// Best-effort write: a failure is logged and otherwise ignored.
    pub async fn record(
        &self,
        condition_type: &str,
        done: bool,
        reason: &str,
        message: impl Into<String>,
    ) {
        if let Err(error) = self
            .try_record(condition_type, done, reason, message)
            .await
        {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                curator = %self.name,
                namespace = %self.namespace,
                "failed to record condition"
            );
        }
    }

    pub async fn try_record(
        &self,
        condition_type: &str,
        done: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        retry::on_conflict("record condition", || async {
            let curator = self.api.get(&self.name).await?;
            let mut conditions = curator.conditions().to_vec();
            let condition = build_condition(
                condition_type,
                done,
                reason,
                message.clone(),
                curator.metadata.generation,
                Time(Utc::now()),
            );
            if !upsert_condition(&mut conditions, condition) {
                return Ok(());
            }
            let patch = json!({
                "metadata": { "resourceVersion": curator.resource_version() },
                "status": { "conditions": conditions },
            });
            self.api
                .patch_status(
                    &self.name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await?;
            Ok(())
        })
        .await
        .with_context(|_| WriteConditionSnafu {
            condition_type,
            namespace: &self.namespace,
            name: &self.name,
        })?;
        tracing::debug!(
            curator = %self.name,
            condition = condition_type,
            done,
            reason,
            "recorded condition"
        );
        Ok(())
    }

    /// Marks `job` as the pipeline owning the record.
    pub async fn claim(&self, job: &str) -> Result<()> {
        self.patch_spec(claim_patch(job)).await
    }

    /// Ends the curation: releases ownership, clears the request and the
    /// post-hook retry trigger, and records the pipeline as finished.
    pub async fn complete(&self) -> Result<()> {
        self.patch_spec(json!({
            "spec": {
                "desiredCuration": null,
                "curatingJob": null,
                "operation": { "retryPosthook": null },
            }
        }))
        .await?;
        self.try_record(
            CLUSTERCURATOR_JOB,
            true,
            REASON_JOB_HAS_FINISHED,
            "curation completed",
        )
        .await
    }

    async fn patch_spec(&self, patch: serde_json::Value) -> Result<()> {
        retry::on_conflict("patch curator spec", || async {
            self.api
                .patch(
                    &self.name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await
        })
        .await
        .with_context(|_| PatchSpecSnafu {
            namespace: &self.namespace,
            name: &self.name,
        })?;
        Ok(())
    }
}

/// Spec merge patch that hands the record to the pipeline Job `job`.
pub fn claim_patch(job: &str) -> serde_json::Value {
    json!({ "spec": { "curatingJob": job } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_sets_only_the_curating_job() {
        assert_eq!(
            claim_patch("curator-job-abc"),
            json!({ "spec": { "curatingJob": "curator-job-abc" } })
        );
    }
}
