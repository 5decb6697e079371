//! REST API server for the exam front end.
//!
//! Provides HTTP endpoints for:
//! - Login and the dashboard device check
//! - Session control (start, finish, rescue, reload, continue)
//! - Recording listing and download

pub mod error;
pub mod routes;

use crate::app::ExamHandle;
use crate::config::Config;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::info;

pub struct ApiServer {
    port: u16,
    handle: ExamHandle,
}

impl ApiServer {
    pub fn new(handle: ExamHandle, config: &Config) -> Self {
        Self {
            port: config.api.port,
            handle,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(service_info))
            .merge(routes::exam::router(self.handle.clone()))
            .merge(routes::recordings::router(self.handle.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&format!("127.0.0.1:{}", self.port))
            .await
            .with_context(|| format!("Failed to bind API port {}", self.port))?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /                    - Service info");
        info!("  GET  /status              - Current exam step and session state");
        info!("  POST /login               - Log in with full name and password");
        info!("  POST /devices/retry       - Re-run the camera/microphone check");
        info!("  POST /exam/start          - Start session 1");
        info!("  POST /session/finish      - Finish the current session early");
        info!("  POST /session/rescue      - Continue after a hardware failure");
        info!("  POST /session/reload      - Restart the current session");
        info!("  POST /break/continue      - Leave the break screen");
        info!("  GET  /recordings          - List recordings");
        info!("  GET  /recordings/:session - Download a recording");

        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "exam-studio",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
