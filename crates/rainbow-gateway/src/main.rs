use std::net::SocketAddr;

use clap::Parser;
use tracing::info;

mod app;
mod bootstrap;
mod http;

#[derive(Parser)]
#[command(name = "rainbow-gateway", about = "Rainbow message processing core")]
struct Args {
    /// Path to rainbow.toml (default: ~/.rainbow/rainbow.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rainbow_gateway=info,rainbow_agent=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("RAINBOW_CONFIG").ok());

    // A present-but-corrupt config refuses startup; an absent one runs on
    // defaults (local simulator mode).
    let config = match &config_path {
        Some(path) if !std::path::Path::new(path).exists() => {
            anyhow::bail!("config file not found: {}", path)
        }
        _ => rainbow_core::RainbowConfig::load(config_path.as_deref())
            .map_err(|e| anyhow::anyhow!("refusing to start with corrupt config: {}", e))?,
    };

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let runtime = bootstrap::build(config).await?;
    let router = app::build_router(runtime.state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Rainbow gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = runtime.shutdown.send(true);
    Ok(())
}
