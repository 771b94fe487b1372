//! The worker every pipeline container runs: one stage per process.
//!
//! The exit code tells the Job why a stage failed: `1` for errors worth
//! retrying, `2` for invalid requests, `3` for monitor timeouts and `4` for
//! failures reported by Hive, Hypershift or Tower.

mod config;

use std::process::ExitCode;

use clap::Parser;
use cluster_curator_operator::{
    error::{Classify, ErrorKind},
    stage,
};
use stackable_telemetry::Tracing;
use tracing::level_filters::LevelFilter;

use crate::config::{WorkerArgs, WorkerConfig};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const CONSOLE_LOG_ENV: &str = "CONSOLE_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let args = WorkerArgs::parse();

    let _tracing_guard = match Tracing::builder()
        .service_name("cluster-curator-worker")
        .with_console_output((CONSOLE_LOG_ENV, LevelFilter::INFO))
        .build()
        .init()
    {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("failed to initialize logging: {error}");
            return exit_code(ErrorKind::Transient);
        }
    };

    tracing::info!(
        version = built_info::PKG_VERSION,
        git = built_info::GIT_VERSION,
        "cluster curator worker"
    );

    let config = match WorkerConfig::from_args(args) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = &error as &dyn std::error::Error, "invalid worker configuration");
            return exit_code(ErrorKind::Validation);
        }
    };
    tracing::debug!(image = config.image_uri.as_deref(), "worker image");

    let client = match stackable_operator::client::create_client(None).await {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "failed to initialize Kubernetes client"
            );
            return exit_code(ErrorKind::Transient);
        }
    };

    match stage::run(client.as_kube_client(), &config.context, config.stage).await {
        Ok(()) => ExitCode::SUCCESS,
        // Already logged and recorded on the ClusterCurator.
        Err(error) => exit_code(error.kind()),
    }
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    // Exit codes are 1 to 4.
    ExitCode::from(u8::try_from(kind.exit_code()).unwrap_or(1))
}
