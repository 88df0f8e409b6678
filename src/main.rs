use std::process::ExitCode;
use std::sync::Arc;

use bgp_neighbor_sync::{
    config::Config,
    controller::{NodeSource, Reconciler},
    device::A10Client,
    telemetry, Error,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    telemetry::init_logging(config.debug, config.log_format);

    info!(
        "Starting bgp-neighbor-sync v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("bgp-neighbor-sync: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Error> {
    config.log();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Honours KUBECONFIG, falls back to in-cluster credentials
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let node_source = NodeSource::new(client);
    let device = Arc::new(A10Client::new(config.device_config())?);
    let label_selector = config.nodes_label_selector.to_string();
    let reconciler = Reconciler::new(Arc::clone(&device), label_selector.clone());

    let startup = async {
        device.fetch_neighbors().await?;
        let nodes = node_source.list_nodes(&label_selector).await?;
        reconciler.full_reconcile(&nodes).await?;
        Ok::<_, Error>(())
    };

    tokio::select! {
        result = startup => result?,
        _ = wait_for_shutdown(shutdown_rx.clone()) => {
            info!("Shutdown requested during startup");
            return Ok(());
        }
    }

    let events = node_source.watch(config.resync_interval());
    reconciler
        .run(events, wait_for_shutdown(shutdown_rx))
        .await
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down...");
}
