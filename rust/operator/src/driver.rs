//! The provisioner capabilities a curation needs, dispatched once on the
//! cluster's [`Topology`].

use async_trait::async_trait;
use cluster_curator_crd::v1beta1::ClusterCurator;
use snafu::{ResultExt, Snafu};
use stackable_operator::kube::{self, ResourceExt};

use crate::{
    error::{Classify, ErrorKind},
    hive::{self, Hive},
    hypershift::{self, Hypershift},
    recorder::Recorder,
    topology::Topology,
    upgrade::{self, UpgradeRequest, Upgrader},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Hive operation failed"))]
    Hive { source: hive::Error },

    #[snafu(display("Hypershift operation failed"))]
    Hypershift { source: hypershift::Error },

    #[snafu(display("ClusterVersion upgrade failed"))]
    Upgrade { source: upgrade::Error },

    #[snafu(display("only hosted clusters can be detached"))]
    DetachNotSupported,
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Hive { source } => source.kind(),
            Error::Hypershift { source } => source.kind(),
            Error::Upgrade { source } => source.kind(),
            Error::DetachNotSupported => ErrorKind::Validation,
        }
    }
}

#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Releases the paused provisioning resources to their operator.
    async fn activate(&self) -> Result<()>;

    async fn monitor_install(&self, attempts: u32) -> Result<()>;

    async fn destroy(&self) -> Result<()>;

    async fn monitor_destroy(&self, attempts: u32) -> Result<()>;

    async fn upgrade(&self, curator: &ClusterCurator) -> Result<()>;

    async fn monitor_upgrade(&self, curator: &ClusterCurator) -> Result<()>;

    async fn detach(&self, attempts: u32) -> Result<()>;

    /// `false` when the cluster already runs the requested version.
    async fn need_to_upgrade(&self, curator: &ClusterCurator) -> Result<bool>;
}

pub fn for_topology(
    client: kube::Client,
    recorder: Recorder,
    curator: &ClusterCurator,
    topology: Topology,
) -> Box<dyn ClusterDriver> {
    let cluster = curator.name_any();
    match topology {
        Topology::Classic => Box::new(ClassicDriver {
            hive: Hive::new(client.clone(), recorder.clone(), &cluster),
            upgrader: Upgrader::new(client, recorder, &cluster),
        }),
        Topology::Hosted => {
            let namespace = curator.namespace().unwrap_or_default();
            Box::new(HostedDriver {
                hypershift: Hypershift::new(client, recorder, &cluster, &namespace),
            })
        }
    }
}

/// Hive for the lifecycle, the hub's view and action for upgrades.
pub struct ClassicDriver {
    hive: Hive,
    upgrader: Upgrader,
}

#[async_trait]
impl ClusterDriver for ClassicDriver {
    async fn activate(&self) -> Result<()> {
        self.hive.activate().await.context(HiveSnafu)
    }

    async fn monitor_install(&self, attempts: u32) -> Result<()> {
        self.hive.monitor_install(attempts).await.context(HiveSnafu)
    }

    async fn destroy(&self) -> Result<()> {
        self.hive.destroy().await.context(HiveSnafu)
    }

    async fn monitor_destroy(&self, attempts: u32) -> Result<()> {
        self.hive.monitor_destroy(attempts).await.context(HiveSnafu)
    }

    async fn upgrade(&self, curator: &ClusterCurator) -> Result<()> {
        self.upgrader
            .upgrade(&UpgradeRequest::from_curator(curator))
            .await
            .context(UpgradeSnafu)
    }

    async fn monitor_upgrade(&self, curator: &ClusterCurator) -> Result<()> {
        self.upgrader
            .monitor(&UpgradeRequest::from_curator(curator), curator.upgrade_timeout())
            .await
            .context(UpgradeSnafu)
    }

    async fn detach(&self, _attempts: u32) -> Result<()> {
        DetachNotSupportedSnafu.fail()
    }

    async fn need_to_upgrade(&self, curator: &ClusterCurator) -> Result<bool> {
        self.upgrader
            .need_to_upgrade(&UpgradeRequest::from_curator(curator))
            .await
            .context(UpgradeSnafu)
    }
}

pub struct HostedDriver {
    hypershift: Hypershift,
}

fn upgrade_target(curator: &ClusterCurator) -> (cluster_curator_crd::UpgradeType, Option<&str>) {
    let upgrade = curator.spec.upgrade.as_ref();
    (
        upgrade.map(|u| u.upgrade_type).unwrap_or_default(),
        upgrade.and_then(|u| u.desired_update.as_deref()),
    )
}

#[async_trait]
impl ClusterDriver for HostedDriver {
    async fn activate(&self) -> Result<()> {
        self.hypershift.activate().await.context(HypershiftSnafu)
    }

    async fn monitor_install(&self, attempts: u32) -> Result<()> {
        self.hypershift
            .monitor_install(attempts)
            .await
            .context(HypershiftSnafu)
    }

    async fn destroy(&self) -> Result<()> {
        self.hypershift.destroy().await.context(HypershiftSnafu)
    }

    async fn monitor_destroy(&self, attempts: u32) -> Result<()> {
        self.hypershift
            .monitor_destroy(attempts)
            .await
            .context(HypershiftSnafu)
    }

    async fn upgrade(&self, curator: &ClusterCurator) -> Result<()> {
        let (upgrade_type, desired) = upgrade_target(curator);
        self.hypershift
            .upgrade(upgrade_type, desired)
            .await
            .context(HypershiftSnafu)
    }

    async fn monitor_upgrade(&self, curator: &ClusterCurator) -> Result<()> {
        let (upgrade_type, desired) = upgrade_target(curator);
        let attempts = u32::try_from(
            curator.upgrade_timeout().as_secs() / hypershift::POLL_INTERVAL.as_secs(),
        )
        .unwrap_or(u32::MAX);
        self.hypershift
            .monitor_upgrade(upgrade_type, desired, attempts)
            .await
            .context(HypershiftSnafu)
    }

    async fn detach(&self, attempts: u32) -> Result<()> {
        self.hypershift.detach(attempts).await.context(HypershiftSnafu)
    }

    async fn need_to_upgrade(&self, curator: &ClusterCurator) -> Result<bool> {
        let (upgrade_type, desired) = upgrade_target(curator);
        match desired {
            Some(desired) if !desired.is_empty() => self
                .hypershift
                .need_to_upgrade(upgrade_type, desired)
                .await
                .context(HypershiftSnafu),
            _ => Ok(true),
        }
    }
}
