use anyhow::Result;
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vlchat_service::{AppState, Upstream, UpstreamConfig, router};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, env = "VLCHAT_ADDR", default_value = "0.0.0.0:9999")]
    addr: String,
    /// Base URL of the OpenAI-compatible model server
    #[arg(long, env = "VLCHAT_UPSTREAM_URL", default_value = "http://127.0.0.1:8000/v1")]
    upstream: String,
    /// Model name sent upstream
    #[arg(long, env = "VLCHAT_UPSTREAM_MODEL", default_value = "MiniCPM-V-4_5")]
    model: String,
    /// Bearer token for the model server
    #[arg(long, env = "VLCHAT_UPSTREAM_API_KEY")]
    api_key: Option<String>,
    /// Connect timeout towards the model server, in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vlchat_service=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    info!(
        addr = %args.addr,
        upstream = %args.upstream,
        model = %args.model,
        auth = %args.api_key.as_ref().map(|_| "enabled").unwrap_or("disabled"),
        "starting service"
    );

    let upstream = Upstream::new(UpstreamConfig {
        base_url: args.upstream,
        model: args.model,
        api_key: args.api_key,
        timeout: Duration::from_secs(args.connect_timeout),
    })?;

    let app = router(AppState {
        upstream: Arc::new(upstream),
    });

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
