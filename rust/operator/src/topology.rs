//! Decides whether a record curates a classic or a hosted-control-plane cluster.

use cluster_curator_crd::{hypershift::HostedCluster, v1beta1::ClusterCurator};
use snafu::{ResultExt, Snafu};
use stackable_operator::kube::{self, Api, ResourceExt};
use strum::{Display, IntoStaticStr};

use crate::error::{Classify, ErrorKind};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to look up HostedCluster {namespace}/{name}"))]
    GetHostedCluster {
        source: kube::Error,
        namespace: String,
        name: String,
    },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetHostedCluster { source, .. } => source.kind(),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, IntoStaticStr, PartialEq)]
pub enum Topology {
    /// Provisioned by Hive through a `ClusterDeployment`.
    Classic,
    /// A Hypershift `HostedCluster` with its `NodePool`s.
    Hosted,
}

/// Hosted records live next to other records in a shared namespace; a record
/// named after its namespace is hosted only if a HostedCluster says so.
pub fn classify(name: &str, namespace: &str, hosted_cluster_exists: bool) -> Topology {
    if name != namespace || hosted_cluster_exists {
        Topology::Hosted
    } else {
        Topology::Classic
    }
}

pub async fn detect(client: kube::Client, curator: &ClusterCurator) -> Result<Topology, Error> {
    let name = curator.name_any();
    let namespace = curator.namespace().unwrap_or_default();
    if curator.is_hosted_shape() {
        return Ok(Topology::Hosted);
    }
    let hosted_clusters: Api<HostedCluster> = Api::namespaced(client, &namespace);
    let hosted_cluster = hosted_clusters
        .get_opt(&name)
        .await
        .with_context(|_| GetHostedClusterSnafu {
            namespace: &namespace,
            name: &name,
        })?;
    Ok(classify(&name, &namespace, hosted_cluster.is_some()))
}
