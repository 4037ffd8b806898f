use anyhow::{Context, Result};
use facecheck_core::{AttendanceLog, DescriptorStore, MatchingEngine, OnnxAnalyzer};
use facecheck_hw::{CameraOpener, V4lOpener};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod check;
mod config;
mod controller;
mod dbus_interface;
mod events;
mod frame_source;
mod register;
mod stop;
#[cfg(test)]
mod testing;
mod worker;

use config::{BusKind, Config};
use controller::{spawn_controller, ControllerDeps};
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facecheckd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    let store = Arc::new(
        DescriptorStore::open(config.store_path(), config.match_threshold)
            .context("failed to open descriptor store")?,
    );
    let log = AttendanceLog::new(config.log_path());

    // Register and check each run their own analyzer.
    let register_engine = MatchingEngine::new(Box::new(
        OnnxAnalyzer::load(&config.model_dir).context("failed to load face models")?,
    ));
    let check_engine = MatchingEngine::new(Box::new(OnnxAnalyzer::load(&config.model_dir)?));

    let opener: Arc<dyn CameraOpener> = Arc::new(V4lOpener::new(
        config.camera_device.clone(),
        config.camera_width,
        config.camera_height,
    ));

    let controller = spawn_controller(ControllerDeps {
        opener,
        store,
        log,
        register_engine,
        check_engine,
        settings: config.controller_settings(),
    })
    .context("failed to spawn controller thread")?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(controller.clone()))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    let forwarder = tokio::spawn(dbus_interface::forward_events(
        connection.clone(),
        controller.subscribe(),
    ));

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facecheckd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facecheckd shutting down");

    if let Err(e) = controller.shutdown().await {
        tracing::warn!(error = %e, "controller did not shut down cleanly");
    }
    forwarder.abort();

    Ok(())
}
