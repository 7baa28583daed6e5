use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use trove_core::config::DEFAULT_MAX_N;
use trove_server::{build_app, ServerConfig};

#[derive(Parser)]
struct Args {
    /// Cache directory built by `tokentrove`
    #[arg(long, default_value = "./cache")]
    cache: PathBuf,
    /// Where report JSON files are written
    #[arg(long, default_value = "./reports")]
    reports: PathBuf,
    /// Highest n-gram order to expose
    #[arg(long, default_value_t = DEFAULT_MAX_N)]
    max_n: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let app: Router = build_app(ServerConfig { cache_dir: args.cache, reports_dir: args.reports, max_n: args.max_n })?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
