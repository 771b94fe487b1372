//! Reconcile counters, served in Prometheus text format next to a health probe.

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{extract::State, http, response::IntoResponse, routing::get, Router};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to bind metrics listener on {address}"))]
    BindListener {
        source: std::io::Error,
        address: SocketAddr,
    },

    #[snafu(display("failed to run metrics server"))]
    RunServer { source: std::io::Error },
}

#[derive(Debug, Default)]
pub struct Metrics {
    reconciles: AtomicU64,
    reconcile_errors: AtomicU64,
    events_filtered: AtomicU64,
    jobs_launched: AtomicU64,
    launches_rejected: AtomicU64,
}

impl Metrics {
    pub fn reconciled(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_failed(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_launched(&self) {
        self.jobs_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn launch_rejected(&self) {
        self.launches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render(&self) -> String {
        let counters = [
            (
                "clustercurator_reconcile_total",
                "Reconciles run for ClusterCurator records.",
                &self.reconciles,
            ),
            (
                "clustercurator_reconcile_errors_total",
                "Reconciles that ended in an error and were requeued.",
                &self.reconcile_errors,
            ),
            (
                "clustercurator_events_filtered_total",
                "Record changes dropped without starting a curation.",
                &self.events_filtered,
            ),
            (
                "clustercurator_jobs_launched_total",
                "Pipeline Jobs created.",
                &self.jobs_launched,
            ),
            (
                "clustercurator_launches_rejected_total",
                "Curations that could not be turned into a pipeline.",
                &self.launches_rejected,
            ),
        ];
        let mut out = String::new();
        for (name, help, value) in counters {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", value.load(Ordering::Relaxed));
        }
        out
    }
}

async fn get_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn get_healthz() -> impl IntoResponse {
    "ok"
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(get_healthz))
        .with_state(metrics)
}

pub async fn serve(address: SocketAddr, metrics: Arc<Metrics>) -> Result<(), Error> {
    let listener = TcpListener::bind(address)
        .await
        .context(BindListenerSnafu { address })?;
    tracing::info!(%address, "serving metrics");
    axum::serve(listener, router(metrics).into_make_service())
        .await
        .context(RunServerSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters() {
        let metrics = Metrics::default();
        metrics.reconciled();
        metrics.reconciled();
        metrics.job_launched();

        let text = metrics.render();
        assert!(text.contains("# TYPE clustercurator_reconcile_total counter\n"));
        assert!(text.contains("\nclustercurator_reconcile_total 2\n"));
        assert!(text.contains("\nclustercurator_jobs_launched_total 1\n"));
        assert!(text.contains("\nclustercurator_reconcile_errors_total 0\n"));
    }
}
