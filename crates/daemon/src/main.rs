use anyhow::Context;
use clap::Parser;
use droidpool::platform::{AdbBridge, HttpHealthProbe, LocalProcessControl, Platform};
use droidpool::routes::advertised_base_url;
use droidpool::{router, telemetry, AppState, DevicePool, NodePool, Settings};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::parse();
    let config = settings.pool_config()?;
    let platform = Platform::current()?;

    let process = Arc::new(LocalProcessControl::new(platform, settings.appium_bin.clone()));
    let probe = Arc::new(
        HttpHealthProbe::new(config.node_host.clone()).context("failed to build health probe")?,
    );
    let bridge = Arc::new(AdbBridge::new(settings.adb_bin.clone()));

    info!(
        pool_size = config.pool_size,
        ttl_secs = config.ttl.as_secs(),
        "starting appium nodes"
    );
    let nodes = Arc::new(NodePool::new(&config, process.clone(), probe));
    nodes.init().await;

    let devices = Arc::new(DevicePool::new(&config, bridge, process));
    let serials = devices.refresh().await;
    info!(devices = ?serials, "initial device scan");

    let state = AppState {
        devices,
        nodes,
        base_url: advertised_base_url(settings.port),
    };
    let base_url = state.base_url.clone();
    let app = router(state);

    let addr = SocketAddr::new(settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, %base_url, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
