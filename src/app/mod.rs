pub mod controller;

pub use controller::{
    ApiCommand, CommandError, DeviceSnapshot, ExamController, ExamHandle, ExamSnapshot,
    SessionSnapshot,
};

use crate::api::ApiServer;
use crate::auth::FirestoreAuthenticator;
use crate::capture::{CaptureContext, CaptureOptions};
use crate::config::Config;
use crate::media::{self, PreviewSurface, TimesliceRecorderFactory};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

pub async fn run_service() -> Result<()> {
    info!("Starting exam studio service");

    let config = Config::load()?;

    let devices = media::backend_from_name(&config.devices.backend)?;
    info!("Using {} device backend", devices.name());

    let authenticator = Arc::new(
        FirestoreAuthenticator::new(&config.auth).context("Failed to set up authentication")?,
    );

    let context = CaptureContext {
        devices,
        recorders: Arc::new(TimesliceRecorderFactory::new(config.session.timeslice())),
        preview: PreviewSurface::new(),
    };

    let controller =
        ExamController::new(authenticator, context, CaptureOptions::from_config(&config));
    let (handle, controller_task) = controller.spawn();

    let api_server = ApiServer::new(handle.clone(), &config);
    let mut server_task = tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("Exam studio is ready!");
    info!(
        "Open the exam front end against http://127.0.0.1:{}",
        config.api.port
    );
    info!(
        "Or check the flow manually: curl http://127.0.0.1:{}/status",
        config.api.port
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        _ = &mut server_task => error!("API server stopped"),
    }

    handle.shutdown();
    if let Err(e) = controller_task.await {
        error!("Exam controller failed: {}", e);
    }
    server_task.abort();
    info!("Devices released, goodbye");
    Ok(())
}
