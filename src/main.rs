use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use joyride::auth::AuthService;
use joyride::clock::SystemClock;
use joyride::config::Config;
use joyride::engine::{Engine, SlotGenerator};
use joyride::http::{self, AppState};
use joyride::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    joyride::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let slots = SlotGenerator::new(config.windows.clone());
    let engine = Arc::new(Engine::open(
        config.wal_path(),
        slots,
        Arc::new(SystemClock),
        config.store_timeout,
    )?);
    let auth = Arc::new(AuthService::new(engine.clone(), config.session_ttl));

    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        auth.ensure_admin(username, password).await?;
    }

    tokio::spawn(reaper::run_session_reaper(auth.clone()));
    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    let app = http::router(AppState {
        engine: engine.clone(),
        auth,
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("joyride listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  windows: {}", describe_windows(&engine.slots));
    info!("  users: {}, bookings: {}", engine.users.len(), engine.ledger.len());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("joyride stopped");
    Ok(())
}

fn describe_windows(slots: &SlotGenerator) -> String {
    slots
        .windows()
        .iter()
        .map(|w| format!("{}-{}/{}", w.start.format("%H:%M"), w.end.format("%H:%M"), w.step_minutes))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolves on ctrl-c or SIGTERM; in-flight requests are drained by axum.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
