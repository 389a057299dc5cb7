//! callsheet-api - HTTP API server for callsheet

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callsheet_api::{router, spawn_event_logger, ApiConfig, AppState, Backend};
use callsheet_clone::{CloneConfig, ReconcilerConfig};
use callsheet_core::{defaults::EVENT_BUS_CAPACITY, CloneSchema, EventBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "callsheet_api=debug,callsheet_clone=info,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "callsheet_api=debug,callsheet_clone=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("callsheet-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked for
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ApiConfig::from_env();
    let mut clone_config = CloneConfig::from_env();
    let reconciler_config = ReconcilerConfig::from_env();

    let backend = Backend::connect(&config, &mut clone_config).await?;
    match clone_config.template_root_id {
        Some(id) => info!(template_root_id = %id, "Demo template configured"),
        None => info!("DEMO_TEMPLATE_PROJECT_ID not set, new accounts get no demo project"),
    }

    let events = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    let _event_logger = spawn_event_logger(&events);

    let state = AppState::new(
        backend,
        CloneSchema::production()?,
        clone_config,
        reconciler_config,
        events,
        config.admin_token.clone(),
    );
    if state.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set, admin routes are disabled");
    }

    let reconciler = state.reconciler.clone().start();
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    reconciler.shutdown().await.ok();
    Ok(())
}
