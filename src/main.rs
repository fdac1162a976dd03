use anyhow::{Context, Result};
use s3_mirror_proxy::config::AppConfig;
use s3_mirror_proxy::routes;
use s3_mirror_proxy::services::http_client::{CachingDnsResolver, build_client};
use s3_mirror_proxy::services::inventory_service::InventoryService;
use s3_mirror_proxy::services::mirror_service::MirrorService;
use s3_mirror_proxy::services::proxy_service::ProxyService;
use s3_mirror_proxy::services::signer::Credentials;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::Url;

/// How long shutdown waits for in-flight replication jobs before giving up.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Config (fatal before serving on anything malformed) ---
    let cfg = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    init_tracing(&cfg.log_level);

    tracing::info!(
        "Starting s3-mirror-proxy: primary={}, mirror={}, inventory={}",
        cfg.main_endpoint,
        cfg.mirror_endpoint,
        if cfg.inventory_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // --- Inventory connection (optional) ---
    let inventory = if cfg.inventory_enabled() {
        let url = cfg.postgres_url.as_deref().unwrap_or_default();
        let inventory = InventoryService::connect(url)
            .await
            .context("failed to connect to database")?;
        tracing::info!("Database connection established");
        inventory
    } else {
        tracing::info!("Database tracking disabled");
        InventoryService::disabled()
    };

    let primary_endpoint =
        Url::parse(&cfg.main_endpoint).context("failed to parse main S3 endpoint")?;
    let mirror_endpoint =
        Url::parse(&cfg.mirror_endpoint).context("failed to parse mirror S3 endpoint")?;

    // --- Shared outbound client with background DNS refresh ---
    let resolver = CachingDnsResolver::new();
    resolver.spawn_refresh_task();
    let client = build_client(resolver).context("failed to build HTTP client")?;
    tracing::info!("Initialized HTTP client with DNS caching");

    // --- Core services ---
    let mirror = MirrorService::new(
        mirror_endpoint,
        Credentials {
            access_key: cfg.mirror_access_key.clone(),
            secret_key: cfg.mirror_secret_key.clone(),
        },
        cfg.mirror_bucket_prefix.clone(),
        client.clone(),
    );
    let proxy = ProxyService::new(
        primary_endpoint,
        Credentials {
            access_key: cfg.main_access_key.clone(),
            secret_key: cfg.main_secret_key.clone(),
        },
        cfg.proxy_domain.clone(),
        client,
        inventory,
        mirror,
    );

    // --- Build router ---
    let app = routes::routes::routes().with_state(proxy.clone());

    // --- Start server ---
    let addr = cfg.addr();
    tracing::info!("Starting S3 proxy server on {}", addr);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Give in-flight inventory/mirror continuations a bounded window to
    // finish; anything still running at the deadline is abandoned.
    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, proxy.drain_jobs())
        .await
        .is_err()
    {
        tracing::warn!("shutdown drain timed out with replication jobs still in flight");
    }

    Ok(())
}

/// Map the LOG_LEVEL option onto a tracing filter. Unknown values fall back
/// to `info`; `off` silences everything.
fn init_tracing(level: &str) {
    let directive = match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        "off" | "disabled" | "none" => "off",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown...");
        }
    }
}
