//! Entry point for the `vmctl-gateway` HTTP server.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use vmctl_engine::{Controller, EngineSettings};
use vmctl_gateway::routes::{create_router, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("VMCTL_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:3457".to_owned());

    let settings = match EngineSettings::from_env() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid engine settings");
            std::process::exit(1);
        }
    };
    info!(
        socket_dir = %settings.socket_dir.display(),
        qemu_img = %settings.qemu_img.display(),
        "engine settings loaded"
    );

    let state = Arc::new(AppState::new(Controller::from_settings(&settings)));
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %addr, "vmctl-gateway listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
