//! Canopy visualization engine binary
//!
//! Usage: `canopy-vis [SYNC_ADDR] [LISTEN_ADDR]`; everything else comes from
//! `CANOPY_*` environment variables.

use std::sync::Arc;

use canopy_transfer::{ConnectionManager, QueryPeer, TcpTransport};
use canopy_vis::{BroadcastRenderer, Engine, VisConfig, VisServer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy=info,canopy_vis=info,canopy_transfer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = VisConfig::from_env()?.with_args(std::env::args().skip(1))?;
    info!(
        sync = %config.sync_addr,
        rpc = %config.rpc_addr,
        listen = %config.listen_addr,
        "Starting canopy-vis"
    );

    let transport = Arc::new(TcpTransport);
    let manager = ConnectionManager::new(transport.clone(), config.reconnect);
    manager.connect(config.sync_addr.clone())?;

    let renderer = BroadcastRenderer::new();
    let feed = renderer.frames();
    let (engine, handle) = Engine::new(manager, config.engine.clone(), renderer)?;

    // Connected on the first discovery request and again after it drops.
    let query = QueryPeer::new(transport, config.rpc_addr.clone(), config.rpc);
    let server = VisServer::new(handle.clone(), feed).with_query_peer(query);
    let listen = config.listen_addr;
    tokio::spawn(async move {
        if let Err(e) = server.serve(listen).await {
            error!(error = %e, "Observation server failed");
        }
    });

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = shutdown.shutdown().await;
        }
    });

    engine.run().await?;
    Ok(())
}
