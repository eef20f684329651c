//! Switchboard - multi-protocol chat relay
//!
//! Connects one bridge per configured account and relays messages between
//! the channels grouped into gateways, optionally re-uploading attachments
//! to a public image host.

mod bridge;
mod cache;
mod common;
mod config;
mod discord;
mod gateway;
mod router;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info, warn};

use bridge::factory::build_bridges;
use bridge::ChannelBundle;
use cache::{HttpDownloader, ImgurHost, MediaResolver, ReuploadCache, MAX_DOWNLOAD_BYTES};
use common::ConfigError;
use config::env::{debug_requested, get_config_path};
use config::{load_and_validate, ReuploadConfig};
use gateway::{load_gateways, GatewaySet};
use router::{Router, RouterSettings};
use supervisor::Supervisor;

#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Config file path [default: $SWITCHBOARD_CONFIG or switchboard.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Empty the attachment re-upload cache before starting
    #[arg(long)]
    purge_cache: bool,

    /// Delete the upload of a cached attachment from the image host and
    /// forget it, by content hash (repeatable)
    #[arg(long, value_name = "HASH")]
    forget: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug || debug_requested() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    info!("Switchboard v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .map(|p| p.display().to_string())
        .unwrap_or_else(get_config_path);
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    let accounts = config.declared_accounts();
    let gateways = load_gateways(&config.gateways, &accounts)?;
    info!("Configuration loaded successfully");
    info!("  Accounts: {}", accounts.len());
    info!("  Gateways: {}", gateways.len());
    info!(
        "  Re-upload: {}",
        if config.reupload.enabled { "enabled" } else { "disabled" }
    );

    let bridges = build_bridges(&config.accounts)?;

    // ============================================================
    // Re-upload cache and router
    // ============================================================

    let cache = open_cache(&config.reupload, cli.purge_cache).await?;

    let mut router = Router::new(gateways, RouterSettings::from_config(&config.general));
    if let Some(cache) = &cache {
        let client_id = config
            .reupload
            .imgur_client_id
            .as_deref()
            .ok_or_else(|| anyhow!("reupload.imgur_client_id is not set"))?;
        let host = ImgurHost::new(client_id)?;
        let downloader = HttpDownloader::new(MAX_DOWNLOAD_BYTES)?;
        let media = Arc::new(MediaResolver::new(
            cache.clone(),
            Arc::new(host),
            Arc::new(downloader),
        ));
        forget_uploads(&media, &cli.forget).await;
        router = router.with_media(media);
    } else if !cli.forget.is_empty() {
        warn!("--forget ignored, re-upload is disabled");
    }
    let router = Arc::new(router);

    let channels = ChannelBundle::new();
    let shutdown_tx = channels.control.shutdown_tx;
    let mut router_task = tokio::spawn(
        router
            .clone()
            .run(channels.router.events_rx, channels.router.shutdown_rx),
    );

    // ============================================================
    // Bridges
    // ============================================================

    let supervisor = Supervisor::new(
        bridges,
        router.clone(),
        config.general.reconnect.clone(),
        channels.supervisor.events_tx,
        channels.supervisor.shutdown_rx,
    );

    if let Err(e) = supervisor.start_all().await {
        error!("{}", e);
        let _ = shutdown_tx.send(true);
        supervisor.stop_all(Duration::ZERO).await;
        return Err(e.into());
    }
    info!("Gateway(s) started successfully. Now relaying messages");
    for (account, state) in supervisor.states() {
        info!("  {}: {}", account, state);
    }
    let supervisor = Arc::new(supervisor);

    let reload_task = tokio::spawn(reload_on_hangup(
        config_path,
        router.clone(),
        supervisor.clone(),
    ));

    let router_running = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping bridges...");
            true
        }
        _ = &mut router_task => {
            error!("Router stopped unexpectedly");
            false
        }
    };

    reload_task.abort();
    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed: {}", e);
    }
    supervisor.stop_all(config.general.shutdown_grace()).await;

    if router_running {
        match tokio::time::timeout(Duration::from_secs(5), router_task).await {
            Ok(Ok(())) => debug!("Router stopped"),
            Ok(Err(e)) => warn!("Router task panicked: {}", e),
            Err(_) => warn!("Router did not stop in time"),
        }
    }

    if let Some(cache) = cache {
        if let Err(e) = cache.close().await {
            warn!("Failed to close re-upload cache: {}", e);
        }
    }

    info!("Exiting...");
    Ok(())
}

/// Open the re-upload cache when enabled.
async fn open_cache(config: &ReuploadConfig, purge: bool) -> Result<Option<ReuploadCache>> {
    if !config.enabled {
        if purge {
            warn!("--purge-cache ignored, re-upload is disabled");
        }
        return Ok(None);
    }

    let cache = ReuploadCache::open(&config.path, config.max_size).await?;
    if purge {
        let removed = cache.purge().await?;
        info!("Purged {} cached upload(s)", removed);
    }
    info!(
        "Re-upload cache at {} holds {} upload(s)",
        config.path.display(),
        cache.len().await?
    );
    Ok(Some(cache))
}

/// Take down the uploads of the given content hashes.
async fn forget_uploads(media: &MediaResolver, hashes: &[String]) {
    for hash in hashes {
        match media.forget(hash).await {
            Ok(true) => info!("Forgot cached upload {}", hash),
            Ok(false) => warn!("No cached upload for {}", hash),
            Err(e) => error!("Failed to forget {}: {}", hash, e),
        }
    }
}

fn read_gateways(path: &str) -> Result<GatewaySet, ConfigError> {
    let config = load_and_validate(path)?;
    load_gateways(&config.gateways, &config.declared_accounts())
}

/// Swap in freshly loaded gateways on every SIGHUP. A config that fails to
/// load leaves the running gateways untouched.
#[cfg(unix)]
async fn reload_on_hangup(path: String, router: Arc<Router>, supervisor: Arc<Supervisor>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading gateways from {}", path);
        match read_gateways(&path) {
            Ok(gateways) => router.reload(gateways),
            Err(e) => warn!("Keeping current gateways: {}", e),
        }
        if !supervisor.is_ready() {
            warn!("No bridge is connected, nothing is relayed until one reconnects");
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_path: String, _router: Arc<Router>, _supervisor: Arc<Supervisor>) {
    std::future::pending::<()>().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
