use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use railbot_core::{
    create_solver, load_config, lookup_service, service::supported_keywords, utc_offset,
    validate_config, wait_until, Config, LogFormat, ReqwestConnector, RunContext, RunRegistry,
    RunStatus, SanitizedConfig, ServiceKind, StartAt,
};
use railbot_server::api::create_router;
use railbot_server::runner::{exit_code, run_service, EXIT_FAILED};
use railbot_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service used when neither an argument nor `RAILBOT_SERVICE` names one.
const DEFAULT_SERVICE: &str = "thsrc";

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(EXIT_FAILED);
        }
    }
}

async fn run() -> Result<i32> {
    let config_path = std::env::var("RAILBOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Logging follows the config, so load it first
    let loaded = load_config(&config_path);
    init_logging(
        loaded
            .as_ref()
            .map(|config| config.logging.format)
            .unwrap_or_default(),
    );
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let keyword = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RAILBOT_SERVICE").ok())
        .unwrap_or_else(|| DEFAULT_SERVICE.to_string());
    let service = lookup_service(&keyword).ok_or_else(|| {
        anyhow!(
            "Unknown service '{}', expected one of: {}",
            keyword,
            supported_keywords()
        )
    })?;

    validate_config(&config, service.kind).context("Configuration validation failed")?;
    info!(
        version = VERSION,
        service = %service,
        config = ?config_path,
        config_hash = %config_hash(&config),
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Interrupt received, stopping");
            cancel.cancel();
        }
    });

    let runs = Arc::new(RunRegistry::new());
    let run = Arc::new(RunContext::new(service.keyword));
    runs.register(Arc::clone(&run));

    let server_stop = cancel.child_token();
    let server = if config.server.enabled {
        Some(spawn_server(&config, Arc::clone(&runs), server_stop.clone()).await?)
    } else {
        info!("Status server disabled in config");
        None
    };

    let status = execute(&config, service.kind, &run, &cancel).await;

    server_stop.cancel();
    if let Some(handle) = server {
        match handle.await {
            Ok(Err(e)) => error!(error = %e, "Status server failed"),
            Err(e) => error!(error = %e, "Status server task panicked"),
            Ok(Ok(())) => info!("Status server stopped"),
        }
    }

    let status = status?;
    info!(run_id = %run.id(), status = ?status, "Run finished");
    Ok(exit_code(status))
}

/// Wait for the scheduled start, then run the service.
async fn execute(
    config: &Config,
    kind: ServiceKind,
    run: &RunContext,
    cancel: &CancellationToken,
) -> Result<RunStatus> {
    let result: Result<RunStatus> = async {
        if let Some(start_at) = config.schedule.start_at.as_deref() {
            let offset = utc_offset(config.schedule.utc_offset_hours)?;
            let start = StartAt::parse(start_at, Utc::now().with_timezone(&offset))?;
            if wait_until(start, cancel).await.is_err() {
                run.finish(RunStatus::Cancelled, "interrupted before the scheduled start");
                return Ok(RunStatus::Cancelled);
            }
        }

        let connector = Arc::new(ReqwestConnector::new(&config.site));
        let solver =
            create_solver(&config.recognizer).context("Failed to set up challenge recognition")?;
        run_service(kind, config, connector, solver, run, cancel).await
    }
    .await;

    if let Err(e) = &result {
        run.finish(RunStatus::Failed, format!("{:#}", e));
    }
    result
}

async fn spawn_server(
    config: &Config,
    runs: Arc<RunRegistry>,
    stop: CancellationToken,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let state = Arc::new(AppState::new(config, runs));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Status server listening on {}", addr);

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stop.cancelled_owned())
            .await
    }))
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Short hash of the redacted config, for matching logs to a config.
fn config_hash(config: &Config) -> String {
    let json = serde_json::to_string(&SanitizedConfig::from(config)).unwrap_or_default();
    let digest = format!("{:x}", Sha256::digest(json.as_bytes()));
    digest[..16].to_string()
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
