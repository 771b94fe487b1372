//! Condition types written to `ClusterCurator.status.conditions`, and a lenient
//! view of the conditions reported by the kinds the curator watches.

use serde::{Deserialize, Serialize};
use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const CLUSTERCURATOR_JOB: &str = "clustercurator-job";
pub const CURRENT_ANSIBLE_JOB: &str = "current-ansible-job";
pub const PREHOOK_ANSIBLEJOB: &str = "prehook-ansiblejob";
pub const POSTHOOK_ANSIBLEJOB: &str = "posthook-ansiblejob";
pub const APPLY_CLOUD_PROVIDER: &str = "applycloudprovider";
pub const ACTIVATE_AND_MONITOR: &str = "activate-and-monitor";
pub const HIVE_PROVISIONING_JOB: &str = "hive-provisioning-job";
pub const HIVE_INSTALLING_JOB: &str = "hive-installing-job";
pub const HIVE_DESTROYING_JOB: &str = "hive-destroying-job";
pub const HYPERSHIFT_PROVISIONING_JOB: &str = "hypershift-provisioning-job";
pub const HYPERSHIFT_DESTROYING_JOB: &str = "hypershift-destroying-job";
pub const MONITOR_IMPORT: &str = "monitor-import";
pub const UPGRADE_CLUSTER: &str = "upgrade-cluster";
pub const MONITOR_UPGRADE: &str = "monitor-upgrade";
pub const DETACH_CLUSTER: &str = "detach-cluster";

pub const REASON_JOB_HAS_STARTED: &str = "Job_has_started";
pub const REASON_JOB_HAS_FINISHED: &str = "Job_has_finished";
pub const REASON_JOB_FAILED: &str = "Job_failed";

/// `prehook-ansiblejob/<hook>` style type for a single hook.
pub fn hook_condition_type(phase: &str, hook_name: &str) -> String {
    format!("{phase}/{hook_name}")
}

/// Builds a condition; `done` maps to `True`, in-flight or failed to `False`.
pub fn build_condition(
    type_: &str,
    done: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: Time,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if done { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation,
        last_transition_time: now,
    }
}

/// Appends `condition`, or updates the existing condition of the same type.
///
/// `lastTransitionTime` only moves when the status flips. Returns whether
/// anything changed, so callers can skip no-op status writes.
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let unchanged = existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
                && existing.observed_generation == condition.observed_generation;
            if unchanged {
                return false;
            }
            let last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                condition.last_transition_time.clone()
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// A condition as reported by Hive, Hypershift, Open Cluster Management or the
/// Ansible resource operator. Every field is optional on the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedCondition {
    #[serde(rename = "type", default)]
    pub type_: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ObservedCondition {
    pub fn is_true(&self) -> bool {
        self.status.eq_ignore_ascii_case("true")
    }

    pub fn is_false(&self) -> bool {
        self.status.eq_ignore_ascii_case("false")
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

pub fn find_observed<'a>(
    conditions: &'a [ObservedCondition],
    type_: &str,
) -> Option<&'a ObservedCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}
