//! Docbind Web - upload documents and download compiled PDFs over HTTP.

mod helpers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use clap::Parser;
use docbind_core::{AppConfig, StorageConfig};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "docbind-web")]
#[command(author, version, about = "Docbind Web Server", long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Config file path
    #[arg(short, long, env = "DOCBIND_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for uploads, converted PDFs and compilations
    #[arg(long, env = "DOCBIND_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Office conversion engine binary (soffice)
    #[arg(long, env = "DOCBIND_SOFFICE")]
    soffice: Option<PathBuf>,

    /// Maximum upload size in megabytes
    #[arg(long, default_value = "100")]
    max_upload_mb: usize,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path).context("Failed to load config file")?,
        None => AppConfig::load().context("Failed to load configuration")?,
    };
    if let Some(data_dir) = &args.data_dir {
        config.storage = StorageConfig::rooted_at(data_dir);
    }
    if let Some(soffice) = &args.soffice {
        config.office.binary_path = Some(soffice.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = load_config(&args)?;
    let state = Arc::new(AppState::new(config).context("Failed to initialize application state")?);

    if !state.pipeline.office_available().await {
        warn!("No office conversion engine found; office uploads will not be converted");
    }

    let app = routes::router(Arc::clone(&state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(args.max_upload_mb * 1024 * 1024))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store, max-age=0"),
            )),
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    info!("Finishing queued conversions");
    state.pipeline.shutdown().await;
    Ok(())
}
