//! tricam: serve every configured sensor as its own MJPEG stream

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tricam::{capture, server, Config, FeedSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tricam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    // Load configuration
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRICAM_CONFIG").ok())
        .unwrap_or_else(|| "tricam.toml".into());
    let config = Config::load(&path)?;

    info!("{}", "=".repeat(60));
    info!("tricam multi-sensor MJPEG server");
    info!("Resolution: {}", config.capture.resolution());
    info!(
        "Target FPS: {} (adaptive down to {})",
        config.stream.target_fps, config.stream.min_fps
    );
    info!("JPEG quality: {}", config.stream.quality);
    info!("{}", "=".repeat(60));

    let host: IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| eyre!("invalid server host '{}': {}", config.server.host, e))?;

    let backend = capture::backend_from_config(&config.capture)?;
    let supervisor = Arc::new(FeedSupervisor::start(&config, backend));

    // Servers drain once this flips and the feeds have stopped
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = Vec::new();
    for feed_config in &config.feeds {
        let handle = supervisor.feed(&feed_config.name)?.clone();
        let addr = SocketAddr::new(host, feed_config.port);
        let mut shutdown = shutdown_rx.clone();
        servers.push(tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server::serve(handle, addr, signal).await {
                error!("Server on {} failed: {}", addr, e);
            }
        }));
    }

    info!("All feeds started. Press Ctrl+C to stop.");
    for feed_config in &config.feeds {
        info!(
            "  {:<6} http://{}:{}/stream  (stats: /stats)",
            feed_config.name, host, feed_config.port
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down camera servers...");

    supervisor.shutdown().await;
    let _ = shutdown_tx.send(true);
    for server in servers {
        let _ = server.await;
    }

    info!("tricam shutting down");
    Ok(())
}
