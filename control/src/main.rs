use anyhow::Result;
use control::apis::status::{KubeStatusSink, MemoryStatusSink, StatusSink};
use control::apis::watcher::spawn_watchers;
use control::graph::store::register_global_graph_store;
use control::{ControllerConfig, GatewayController};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// lbgraph controller
///
/// Watches Gateway API objects and keeps one configuration graph per
/// accepted Gateway.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt::init();

    let config = ControllerConfig::from_env()?;
    info!(
        controller = %config.controller_name,
        tenant = %config.tenant,
        cluster = %config.cluster_name,
        "Starting lbgraph controller"
    );

    let client = kube::Client::try_default().await?;
    let sink: Arc<dyn StatusSink> = if config.write_status {
        Arc::new(KubeStatusSink::new(client.clone(), &config.controller_name))
    } else {
        info!("Status writes disabled, keeping reports in memory");
        Arc::new(MemoryStatusSink::new())
    };

    let controller = GatewayController::new(config, sink);
    register_global_graph_store(controller.store());
    controller.start();

    let watchers = spawn_watchers(client, &controller);
    info!("Watchers started. Press Ctrl-C to exit.");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for handle in &watchers {
        handle.abort();
    }
    controller.shutdown().await;

    Ok(())
}
