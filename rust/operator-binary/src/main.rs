mod config;
mod controller;
mod leader;
mod metrics;

use std::sync::Arc;

use clap::Parser;
use cluster_curator_crd::{merged_crd, v1beta1::ClusterCurator, APP_NAME, OPERATOR_NAME};
use futures::StreamExt;
use stackable_operator::{
    cli::{Command, ProductOperatorRun},
    kube::runtime::{
        events::{Recorder, Reporter},
        watcher, Controller,
    },
    logging::controller::report_controller_reconciled,
    shared::yaml::SerializeOptions,
    YamlSchema,
};
use stackable_telemetry::Tracing;
use tracing::level_filters::LevelFilter;

use crate::{
    config::{ControllerConfig, CuratorRun},
    controller::CURATOR_FULL_CONTROLLER_NAME,
    leader::LeaderElector,
    metrics::Metrics,
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const CONSOLE_LOG_ENV: &str = "CONSOLE_LOG";

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<CuratorRun>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => merged_crd()?
            .print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())?,
        Command::Run(run) => {
            let _tracing_guard = Tracing::builder()
                .service_name(APP_NAME)
                .with_console_output((CONSOLE_LOG_ENV, LevelFilter::INFO))
                .build()
                .init()?;

            stackable_operator::utils::print_startup_string(
                built_info::PKG_DESCRIPTION,
                built_info::PKG_VERSION,
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let config = ControllerConfig::from(&run);
            let ProductOperatorRun {
                watch_namespace,
                cluster_info_opts,
                ..
            } = run.common;

            let client = stackable_operator::client::initialize_operator(
                Some(OPERATOR_NAME.to_string()),
                &cluster_info_opts,
            )
            .await?;

            let metrics = Arc::new(Metrics::default());
            let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics.clone()));

            let elector = config
                .leader_election
                .clone()
                .map(|election| LeaderElector::new(client.as_kube_client(), election));
            if let Some(elector) = &elector {
                elector.acquire().await?;
            }
            let leadership = async {
                match &elector {
                    Some(elector) => elector.hold().await,
                    None => std::future::pending::<leader::Error>().await,
                }
            };

            let event_recorder = Arc::new(Recorder::new(
                client.as_kube_client(),
                Reporter {
                    controller: CURATOR_FULL_CONTROLLER_NAME.to_string(),
                    instance: elector.as_ref().map(|e| e.identity().to_string()),
                },
            ));

            let curator_controller = Controller::new(
                watch_namespace.get_api::<ClusterCurator>(&client),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(
                controller::reconcile_curator,
                controller::error_policy,
                Arc::new(controller::Ctx::new(client.clone(), config, metrics)),
            )
            .for_each_concurrent(16, |result| {
                let event_recorder = event_recorder.clone();
                async move {
                    report_controller_reconciled(
                        &event_recorder,
                        CURATOR_FULL_CONTROLLER_NAME,
                        &result,
                    )
                    .await;
                }
            });

            tokio::select! {
                () = curator_controller => {}
                result = metrics_server => result??,
                lost = leadership => Err::<(), _>(lost)?,
            }
        }
    }

    Ok(())
}
