use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use infergate_scheduler::logging::{init_tracing, request_logger};
use infergate_scheduler::monitor::{ResourceProbe, SystemProbe};
use infergate_scheduler::{routes, AppState, Config, ExecutionEngine, HttpEngine, Scheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args().any(|a| a == "--version" || a == "-V") {
        println!("infergate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let config_path = std::env::var("INFERGATE_CONFIG").ok();
    let config = Config::load(config_path.as_deref())?;

    init_tracing(&config.logging.level);
    tracing::info!("Starting infergate {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    // The engine runner reports accelerator load; host sysinfo covers the general backend.
    let engine = Arc::new(HttpEngine::new(
        &config.engine.base_url,
        Duration::from_secs(config.engine.timeout_secs),
    )?);
    let general_probe: Arc<dyn ResourceProbe> = Arc::new(SystemProbe::new());
    let accelerator_probe: Arc<dyn ResourceProbe> = engine.clone();
    let engine: Arc<dyn ExecutionEngine> = engine;

    let scheduler = Arc::new(Scheduler::new(
        &config,
        engine.clone(),
        accelerator_probe,
        general_probe,
    )?);
    scheduler.start().await?;

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        engine,
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::router(state))
        .layer(middleware::from_fn(request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
