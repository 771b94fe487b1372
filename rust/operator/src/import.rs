//! Waits for a freshly provisioned cluster to join the hub.

use std::time::Duration;

use cluster_curator_crd::{conditions::MONITOR_IMPORT, ocm::ManagedCluster};
use snafu::{ResultExt, Snafu};
use stackable_operator::kube::{self, Api};

use crate::{
    error::{Classify, ErrorKind},
    recorder::Recorder,
    retry,
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read ManagedCluster {name}"))]
    GetManagedCluster { source: kube::Error, name: String },

    #[snafu(display("Timed out waiting for job import of {name}"))]
    TimedOut { name: String },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetManagedCluster { source, .. } => source.kind(),
            Error::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

/// Polls the cluster-scoped `ManagedCluster` until the hub reports it available.
/// A cluster that is not registered yet is waited for like an unavailable one.
pub async fn monitor(
    client: kube::Client,
    recorder: &Recorder,
    cluster: &str,
    attempts: u32,
) -> Result<(), Error> {
    let managed_clusters: Api<ManagedCluster> = Api::all(client);
    recorder
        .started(MONITOR_IMPORT, format!("waiting for ManagedCluster {cluster} to become available"))
        .await;

    let available = retry::poll(POLL_INTERVAL, attempts, |attempt| {
        let managed_clusters = managed_clusters.clone();
        async move {
            let managed_cluster = managed_clusters
                .get_opt(cluster)
                .await
                .context(GetManagedClusterSnafu { name: cluster })?;
            let available = managed_cluster
                .as_ref()
                .is_some_and(ManagedCluster::is_available);
            tracing::debug!(cluster, attempt, available, "checked ManagedCluster");
            Ok::<_, Error>(available.then_some(()))
        }
    })
    .await?;

    match available {
        Some(()) => {
            recorder
                .finished(MONITOR_IMPORT, format!("ManagedCluster {cluster} is available"))
                .await;
            Ok(())
        }
        None => {
            recorder
                .failed(MONITOR_IMPORT, "Timed out waiting for the cluster to import")
                .await;
            TimedOutSnafu { name: cluster }.fail()
        }
    }
}
