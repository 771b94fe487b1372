//! Single-active-replica election over a `coordination.k8s.io/v1` Lease.
//!
//! A candidate takes the lease when nobody holds it or the holder stopped
//! renewing for longer than the lease duration. The leader renews every retry
//! period and steps down once renewals have failed for the renew deadline.
//! Writes carry the read `resourceVersion`, so two candidates racing for the
//! same lease cannot both win.

use rand::Rng;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::coordination::v1::{Lease, LeaseSpec},
        apimachinery::pkg::apis::meta::v1::MicroTime,
        chrono::{DateTime, Duration as ChronoDuration, Utc},
    },
    kube::{
        self,
        api::{ObjectMeta, PostParams},
        Api,
    },
};

use crate::config::LeaderElectionConfig;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read Lease {namespace}/{name}"))]
    GetLease {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to write Lease {namespace}/{name}"))]
    WriteLease {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("lost Lease {namespace}/{name}: not renewed within {deadline_seconds}s"))]
    LostLease {
        namespace: String,
        name: String,
        deadline_seconds: u64,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq)]
pub enum LeaseState {
    /// No holder recorded.
    Vacant,
    HeldBySelf,
    HeldByOther { holder: String },
    /// The holder has not renewed within the lease duration.
    Expired { holder: String },
}

impl LeaseState {
    pub fn can_take(&self) -> bool {
        !matches!(self, LeaseState::HeldByOther { .. })
    }
}

pub fn lease_state(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseState {
    let Some(spec) = spec else {
        return LeaseState::Vacant;
    };
    let Some(holder) = spec.holder_identity.as_deref().filter(|h| !h.is_empty()) else {
        return LeaseState::Vacant;
    };
    if holder == identity {
        return LeaseState::HeldBySelf;
    }
    let last_renewal = spec
        .renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|time| time.0);
    let duration = ChronoDuration::seconds(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
    match last_renewal {
        Some(renewed) if renewed + duration > now => LeaseState::HeldByOther {
            holder: holder.to_string(),
        },
        _ => LeaseState::Expired {
            holder: holder.to_string(),
        },
    }
}

/// The spec to write when `identity` takes or renews the lease.
pub fn claimed_spec(
    current: Option<&LeaseSpec>,
    identity: &str,
    lease_duration_seconds: i32,
    now: DateTime<Utc>,
) -> LeaseSpec {
    let renewing = current
        .and_then(|spec| spec.holder_identity.as_deref())
        .is_some_and(|holder| holder == identity);
    let transitions = current
        .and_then(|spec| spec.lease_transitions)
        .unwrap_or(0);
    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(lease_duration_seconds),
        acquire_time: if renewing {
            current.and_then(|spec| spec.acquire_time.clone())
        } else {
            Some(MicroTime(now))
        },
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(if renewing || current.is_none() {
            transitions
        } else {
            transitions + 1
        }),
        ..LeaseSpec::default()
    }
}

/// `HOSTNAME` of the pod plus a random suffix, so restarts in the same pod
/// never reuse a stale holder identity.
pub fn candidate_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "cluster-curator-controller".into());
    let suffix: u32 = rand::thread_rng().gen();
    format!("{host}_{suffix:08x}")
}

pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderElectionConfig,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: kube::Client, config: LeaderElectionConfig) -> Self {
        Self {
            api: Api::namespaced(client, &config.lease_namespace),
            identity: candidate_identity(),
            config,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Waits until this replica holds the lease.
    pub async fn acquire(&self) -> Result<()> {
        tracing::info!(
            identity = %self.identity,
            lease = %self.config.lease_name,
            namespace = %self.config.lease_namespace,
            "waiting for leadership"
        );
        loop {
            if self.try_acquire_or_renew().await? {
                tracing::info!(identity = %self.identity, "became leader");
                return Ok(());
            }
            tokio::time::sleep(self.config.retry_period).await;
        }
    }

    /// Renews the lease until renewals fail for longer than the renew deadline.
    ///
    /// Only returns once leadership is lost.
    pub async fn hold(&self) -> Error {
        let mut last_renewal = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.config.retry_period).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = tokio::time::Instant::now(),
                Ok(false) => tracing::warn!(identity = %self.identity, "lease taken by another candidate"),
                Err(error) => tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to renew lease"
                ),
            }
            if last_renewal.elapsed() > self.config.renew_deadline {
                return Error::LostLease {
                    namespace: self.config.lease_namespace.clone(),
                    name: self.config.lease_name.clone(),
                    deadline_seconds: self.config.renew_deadline.as_secs(),
                };
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let name = &self.config.lease_name;
        let namespace = &self.config.lease_namespace;
        let now = Utc::now();
        let duration = i32::try_from(self.config.lease_duration.as_secs()).unwrap_or(i32::MAX);

        let existing = self
            .api
            .get_opt(name)
            .await
            .context(GetLeaseSnafu { namespace, name })?;

        let result = match existing {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(claimed_spec(None, &self.identity, duration, now)),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
            Some(mut lease) => {
                let state = lease_state(lease.spec.as_ref(), &self.identity, now);
                if !state.can_take() {
                    return Ok(false);
                }
                if let LeaseState::Expired { holder } = &state {
                    tracing::info!(previous = %holder, "taking over expired lease");
                }
                lease.spec = Some(claimed_spec(lease.spec.as_ref(), &self.identity, duration, now));
                self.api.replace(name, &PostParams::default(), &lease).await
            }
        };

        match result {
            Ok(_) => Ok(true),
            // Another candidate wrote first.
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(source) => Err(source).context(WriteLeaseSnafu { namespace, name }),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use stackable_operator::k8s_openapi::chrono::TimeZone;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn held_by(holder: &str, renewed: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(137),
            acquire_time: Some(MicroTime(at(0))),
            renew_time: Some(MicroTime(at(renewed))),
            lease_transitions: Some(3),
            ..LeaseSpec::default()
        }
    }

    #[rstest]
    #[case(None, 0, LeaseState::Vacant)]
    #[case(Some(held_by("", 0)), 0, LeaseState::Vacant)]
    #[case(Some(held_by("me", 0)), 500, LeaseState::HeldBySelf)]
    #[case(Some(held_by("other", 0)), 100, LeaseState::HeldByOther { holder: "other".into() })]
    #[case(Some(held_by("other", 0)), 137, LeaseState::Expired { holder: "other".into() })]
    #[case(Some(held_by("other", 100)), 200, LeaseState::HeldByOther { holder: "other".into() })]
    fn classifies_lease(
        #[case] spec: Option<LeaseSpec>,
        #[case] now: i64,
        #[case] expected: LeaseState,
    ) {
        assert_eq!(lease_state(spec.as_ref(), "me", at(now)), expected);
    }

    #[test]
    fn renewal_keeps_acquire_time_and_transitions() {
        let current = held_by("me", 50);
        let spec = claimed_spec(Some(&current), "me", 137, at(100));
        assert_eq!(spec.acquire_time, Some(MicroTime(at(0))));
        assert_eq!(spec.renew_time, Some(MicroTime(at(100))));
        assert_eq!(spec.lease_transitions, Some(3));
    }

    #[test]
    fn takeover_counts_a_transition() {
        let current = held_by("other", 0);
        let spec = claimed_spec(Some(&current), "me", 137, at(300));
        assert_eq!(spec.holder_identity.as_deref(), Some("me"));
        assert_eq!(spec.acquire_time, Some(MicroTime(at(300))));
        assert_eq!(spec.lease_transitions, Some(4));
    }

    #[test]
    fn first_claim() {
        let spec = claimed_spec(None, "me", 137, at(0));
        assert_eq!(spec.lease_duration_seconds, Some(137));
        assert_eq!(spec.lease_transitions, Some(0));
    }
}
