use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use interlink::api;
use interlink::cli;
use interlink::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interlink=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    // Socket server listen address setup
    let listen_address: IpAddr = settings
        .listen_address
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid ip address: {}", settings.listen_address))?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    let hub = Arc::new(Hub::new(settings).await?);
    hub.start();

    // Build Axum Router
    let app = api::api(Arc::clone(&hub));

    // Start server
    info!("Starting interlink on {}", socket_address);
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    axum::serve(listener, app).await?;

    hub.shutdown();
    Ok(())
}
