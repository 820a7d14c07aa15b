use anyhow::{Context, Result};
use brig::areas::bridge::{Bridge, BridgeOptions};
use brig::areas::rest_backend::{RestBackend, RestPayloadStore};
use brig::config::Config;
use brig::server::auth::OpenPolicy;
use brig::server::{AppState, router};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "brig",
    version,
    about = "Git Smart HTTP bridge over a versioned storage backend",
    long_about = "Serves git clone/fetch/push and the Git-LFS batch API for \
    repositories stored in an external version-control backend. Flags \
    override BRIG_* environment variables, which override built-in defaults."
)]
struct Cli {
    #[arg(long, help = "Address to bind the HTTP server to")]
    bind: Option<String>,

    #[arg(long, help = "Public base URL clients reach this server at")]
    public_url: Option<String>,

    #[arg(long, help = "Backend REST endpoint")]
    backend_endpoint: Option<String>,

    #[arg(long, help = "Storage gateway endpoint for LFS payloads")]
    storage_endpoint: Option<String>,

    #[arg(long, help = "Blob size in bytes at which payloads move to LFS")]
    lfs_threshold: Option<u64>,

    #[arg(long, help = "Accept pushes that discard history")]
    allow_force_push: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(public_url) = cli.public_url {
        config.public_url = public_url;
    }
    if let Some(endpoint) = cli.backend_endpoint {
        config.backend_endpoint = endpoint;
    }
    if let Some(endpoint) = cli.storage_endpoint {
        config.storage_endpoint = endpoint;
    }
    if let Some(threshold) = cli.lfs_threshold {
        config.lfs_threshold_bytes = threshold;
    }
    if cli.allow_force_push {
        config.allow_force_push = true;
    }

    let backend = Arc::new(RestBackend::new(
        &config.backend_endpoint,
        &config.backend_access_key,
        &config.backend_secret_key,
    ));
    let payloads = Arc::new(RestPayloadStore::new(
        &config.storage_endpoint,
        &config.backend_access_key,
        &config.backend_secret_key,
    ));
    let bridge = Bridge::new(
        backend,
        payloads,
        BridgeOptions {
            lfs_threshold: config.lfs_threshold_bytes,
            public_url: config.public_url.clone(),
            allow_force_push: config.allow_force_push,
        },
    );

    let state = AppState {
        bridge: Arc::new(bridge),
        policy: Arc::new(OpenPolicy),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    info!(
        bind = %config.bind_addr,
        backend = %config.backend_endpoint,
        lfs_threshold = config.lfs_threshold_bytes,
        "brig listening"
    );

    axum::serve(listener, router(state))
        .await
        .context("server exited")
}
