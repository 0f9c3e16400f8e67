//! kube-fip-controller
//!
//! Watches Kubernetes nodes and assigns OpenStack floating IPs to the ones
//! that opted in via labels, recording the assigned address back on the node.

mod config;
mod controller;
mod error;
mod metrics;
mod node_cache;
mod reconciler;
mod workqueue;

use clap::Parser;
use config::{read_auth_config, Options};
use controller::Controller;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let opts = Options::parse();

    let level = if opts.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("starting kube-fip-controller");

    let auth = match read_auth_config(&opts.config) {
        Ok(auth) => auth,
        Err(err) => {
            error!(error = %err, "fatal error starting the controller");
            std::process::exit(1);
        }
    };

    let controller = match Controller::new(&opts, auth).await {
        Ok(controller) => controller,
        Err(err) => {
            error!(error = %err, "fatal error starting the controller");
            std::process::exit(1);
        }
    };

    metrics::register();
    let (stop_tx, stop_rx) = watch::channel(false);

    let metrics_task = tokio::spawn(metrics::serve_metrics(
        opts.metric_host,
        opts.metric_port,
        stop_rx.clone(),
    ));
    let controller_task = tokio::spawn(controller.run(opts.threadiness, stop_rx));

    wait_for_shutdown_signal().await;
    info!("shutting down");
    let _ = stop_tx.send(true);

    let _ = controller_task.await;
    let _ = metrics_task.await;
}

/// Completes on the first SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(err) => {
            error!(error = %err, "failed to install SIGINT handler");
            std::process::exit(1);
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}
