//! Axum route handlers for the vmctl gateway API.

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use vmctl_core::{Architecture, CaptureName, DisplayMode, VirtualMachineConfig, VmId};
use vmctl_engine::{
    ConsoleTransport, Controller, DiskTool, EngineLauncher, InstanceState, StopOutcome,
};

use crate::{error::GatewayError, registry::MachineRegistry};

// ── Shared state ─────────────────────────────────────────────────────────────

/// Everything a handler can reach.
pub struct AppState<L, T, D> {
    pub controller: Controller<L, T, D>,
    pub registry: MachineRegistry,
}

impl<L, T, D> AppState<L, T, D> {
    #[must_use]
    pub fn new(controller: Controller<L, T, D>) -> Self {
        Self {
            controller,
            registry: MachineRegistry::new(),
        }
    }

    fn config(&self, id: VmId) -> Result<VirtualMachineConfig, GatewayError> {
        self.registry.get(id).ok_or(GatewayError::VmNotFound(id))
    }
}

type Shared<L, T, D> = State<Arc<AppState<L, T, D>>>;

// ── Request / response types ──────────────────────────────────────────────────

/// Body of `PUT /v1/vms/{id}`.
#[derive(Debug, Deserialize)]
pub struct MachineBody {
    /// `aarch64`, `x86_64` or `i386` (aliases `arm64`, `amd64`, `x86`).
    pub architecture: String,
    pub disk_path: PathBuf,
    pub memory_mib: Option<u32>,
    pub cpu_count: Option<u16>,
    pub install_media: Option<PathBuf>,
    #[serde(default)]
    pub display: DisplayMode,
}

impl MachineBody {
    fn into_config(self, id: VmId) -> Result<VirtualMachineConfig, GatewayError> {
        let architecture: Architecture = self.architecture.parse()?;
        let mut config = VirtualMachineConfig::new(id, architecture, self.disk_path).with_display(self.display);
        if let Some(mib) = self.memory_mib {
            if mib == 0 {
                return Err(GatewayError::InvalidRequest("memory_mib must be positive".to_owned()));
            }
            config = config.with_memory_mib(mib);
        }
        if let Some(cpus) = self.cpu_count {
            if cpus == 0 {
                return Err(GatewayError::InvalidRequest("cpu_count must be positive".to_owned()));
            }
            config = config.with_cpu_count(cpus);
        }
        if let Some(media) = self.install_media {
            config = config.with_install_media(media);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
pub struct MachineView {
    pub config: VirtualMachineConfig,
    pub state: InstanceState,
    pub running: bool,
}

/// Body of `POST /v1/vms/{id}/captures`. Both fields are optional (`{}` is
/// valid): without `name` the capture gets a timestamp name, and `label` is
/// reported alongside it.
#[derive(Debug, Default, Deserialize)]
pub struct CreateCaptureBody {
    pub label: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCaptureResponse {
    pub name: CaptureName,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub outcome: StopOutcome,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router around `state`.
pub fn create_router<L, T, D>(state: Arc<AppState<L, T, D>>) -> Router
where
    L: EngineLauncher + 'static,
    T: ConsoleTransport + 'static,
    D: DiskTool + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/v1/vms", get(list_vms::<L, T, D>))
        .route("/v1/vms/{id}", put(put_vm::<L, T, D>).get(get_vm::<L, T, D>))
        .route("/v1/vms/{id}/start", post(start_vm::<L, T, D>))
        .route("/v1/vms/{id}/stop", post(stop_vm::<L, T, D>))
        .route("/v1/vms/{id}/status", get(vm_status::<L, T, D>))
        .route(
            "/v1/vms/{id}/captures",
            get(list_captures::<L, T, D>).post(create_capture::<L, T, D>),
        )
        .route(
            "/v1/vms/{id}/captures/{name}",
            delete(delete_capture::<L, T, D>),
        )
        .route(
            "/v1/vms/{id}/captures/{name}/restore",
            post(restore_capture::<L, T, D>),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn view<L, T, D>(state: &AppState<L, T, D>, config: VirtualMachineConfig) -> MachineView
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let id = config.id;
    MachineView {
        config,
        state: state.controller.state(id).await,
        running: state.controller.is_running(id).await,
    }
}

/// `GET /v1/vms`: every registered machine.
pub async fn list_vms<L, T, D>(State(state): Shared<L, T, D>) -> impl IntoResponse
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let mut views = Vec::new();
    for config in state.registry.list() {
        views.push(view(&state, config).await);
    }
    Json(views)
}

/// `PUT /v1/vms/{id}`: register or replace a configuration.
///
/// # Errors
/// Returns [`GatewayError::InvalidInput`] for an unknown architecture, or
/// [`GatewayError::ArchitectureLocked`] if the machine is running and the
/// architecture would change.
pub async fn put_vm<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
    Json(body): Json<MachineBody>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = body.into_config(id)?;
    if let Some(current) = state.registry.get(id) {
        if current.architecture != config.architecture && state.controller.is_running(id).await {
            return Err(GatewayError::ArchitectureLocked(id));
        }
    }

    let status = match state.registry.upsert(config.clone()) {
        Some(_) => StatusCode::OK,
        None => StatusCode::CREATED,
    };
    tracing::info!(vm_id = %id, arch = %config.architecture, "configuration registered");
    Ok((status, Json(view(&state, config).await)))
}

/// `GET /v1/vms/{id}`: configuration plus lifecycle state.
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered.
pub async fn get_vm<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    Ok(Json(view(&state, config).await))
}

/// `POST /v1/vms/{id}/start`
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered, or the
/// supervisor's failure.
pub async fn start_vm<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    let instance = state.controller.start(&config).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// `POST /v1/vms/{id}/stop`
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered, or the
/// supervisor's failure.
pub async fn stop_vm<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    state.config(id)?;
    let outcome = state.controller.stop(id).await?;
    Ok(Json(StopResponse { outcome }))
}

/// `GET /v1/vms/{id}/status`: guest run state straight from the console.
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered, or
/// [`GatewayError::Control`] if the console cannot be reached.
pub async fn vm_status<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    state.config(id)?;
    Ok(Json(state.controller.status(id).await?))
}

/// `GET /v1/vms/{id}/captures`
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered, or the
/// coordinator's failure.
pub async fn list_captures<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    Ok(Json(state.controller.capture_list(&config).await?))
}

/// `POST /v1/vms/{id}/captures`
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered,
/// [`GatewayError::InvalidInput`] for an invalid explicit name, or the
/// coordinator's failure.
pub async fn create_capture<L, T, D>(
    State(state): Shared<L, T, D>,
    Path(id): Path<VmId>,
    Json(body): Json<CreateCaptureBody>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    let name = match body.name {
        Some(name) => {
            let name = CaptureName::new(name)?;
            state.controller.capture_create_named(&config, &name).await?;
            name
        }
        None => {
            state
                .controller
                .capture_create(&config, body.label.as_deref())
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(CreateCaptureResponse { name })))
}

/// `POST /v1/vms/{id}/captures/{name}/restore`
///
/// # Errors
/// Returns [`GatewayError::VmNotFound`] if the ID is not registered,
/// [`GatewayError::InvalidInput`] for an invalid name, or the coordinator's
/// failure.
pub async fn restore_capture<L, T, D>(
    State(state): Shared<L, T, D>,
    Path((id, name)): Path<(VmId, String)>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    let name = CaptureName::new(name)?;
    state.controller.capture_restore(&config, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /v1/vms/{id}/captures/{name}`
///
/// # Errors
/// Same as [`restore_capture`].
pub async fn delete_capture<L, T, D>(
    State(state): Shared<L, T, D>,
    Path((id, name)): Path<(VmId, String)>,
) -> Result<impl IntoResponse, GatewayError>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    let config = state.config(id)?;
    let name = CaptureName::new(name)?;
    state.controller.capture_delete(&config, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
