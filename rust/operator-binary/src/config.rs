//! Command line options of the controller.

use std::{net::SocketAddr, time::Duration};

#[derive(clap::Parser, Clone, Debug)]
pub struct CuratorRun {
    /// Image every pipeline container runs.
    #[arg(long, env)]
    pub image_uri: String,

    /// Address of the `/metrics` and `/healthz` endpoint, `:8080` binds all interfaces.
    #[arg(long, env, default_value = ":8080", value_parser = parse_listen_addr)]
    pub metrics_addr: SocketAddr,

    #[command(flatten)]
    pub leader_election: LeaderElectionArgs,

    #[command(flatten)]
    pub common: stackable_operator::cli::ProductOperatorRun,
}

#[derive(clap::Args, Clone, Debug)]
pub struct LeaderElectionArgs {
    /// Only let the replica holding the lease reconcile.
    #[arg(long, env)]
    pub enable_leader_election: bool,

    /// How long a lease is valid after its last renewal.
    #[arg(long, env, default_value = "137s", value_parser = parse_seconds)]
    pub leader_election_lease_duration: Duration,

    /// How long the leader keeps trying to renew before it steps down.
    #[arg(long, env, default_value = "107s", value_parser = parse_seconds)]
    pub leader_election_renew_deadline: Duration,

    /// Pause between two acquire or renew attempts.
    #[arg(long, env, default_value = "26s", value_parser = parse_seconds)]
    pub leader_election_retry_period: Duration,

    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    #[arg(long, env, default_value = "cluster-curator-controller")]
    pub leader_election_id: String,
}

/// Everything the reconciler needs beyond the client.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub image_uri: String,
    pub metrics_addr: SocketAddr,
    pub leader_election: Option<LeaderElectionConfig>,
}

#[derive(Clone, Debug)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub lease_namespace: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl From<&CuratorRun> for ControllerConfig {
    fn from(run: &CuratorRun) -> Self {
        let election = &run.leader_election;
        Self {
            image_uri: run.image_uri.clone(),
            metrics_addr: run.metrics_addr,
            leader_election: election
                .enable_leader_election
                .then(|| LeaderElectionConfig {
                    lease_name: election.leader_election_id.clone(),
                    lease_namespace: election.leader_election_namespace.clone(),
                    lease_duration: election.leader_election_lease_duration,
                    renew_deadline: election.leader_election_renew_deadline,
                    retry_period: election.leader_election_retry_period,
                }),
        }
    }
}

/// Accepts `137s` as well as a bare number of seconds.
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let digits = value.strip_suffix('s').unwrap_or(value);
    digits
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("{value:?} is not a number of seconds"))
}

pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, String> {
    let value = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };
    value
        .parse()
        .map_err(|error| format!("{value:?} is not a valid listen address: {error}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("137s", 137)]
    #[case("26", 26)]
    #[case("0s", 0)]
    fn seconds(#[case] value: &str, #[case] expected: u64) {
        assert_eq!(parse_seconds(value), Ok(Duration::from_secs(expected)));
    }

    #[rstest]
    #[case("2m")]
    #[case("s")]
    #[case("-5s")]
    fn invalid_seconds(#[case] value: &str) {
        assert!(parse_seconds(value).is_err());
    }

    #[rstest]
    #[case(":8080", "0.0.0.0:8080")]
    #[case("127.0.0.1:9090", "127.0.0.1:9090")]
    fn listen_addrs(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(parse_listen_addr(value).unwrap().to_string(), expected);
    }

    #[test]
    fn invalid_listen_addr() {
        assert!(parse_listen_addr("localhost").is_err());
    }
}
