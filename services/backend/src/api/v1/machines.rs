//! Machine API endpoints.
//!
//! Registration, listing and removal of washing machines, plus an admin
//! release for machines that need to be freed by hand.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use lavanderia_id::{MachineId, OrderId, RequestId};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, FieldError};
use crate::model::{Machine, MachineUpdate, NewMachine};
use crate::state::AppState;

const MAX_NAME_LEN: usize = 100;

/// Create machine routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_machine).get(list_machines))
        .route(
            "/{machine_id}",
            get(get_machine)
                .patch(update_machine)
                .delete(delete_machine),
        )
        .route("/{machine_id}/release", post(release_machine))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to register a machine.
#[derive(Debug, Deserialize)]
pub struct CreateMachineRequest {
    pub name: String,

    /// Load capacity in kilograms.
    pub capacity_kg: i32,
}

/// Request to rename or resize a machine. Omitted fields are kept.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMachineRequest {
    pub name: Option<String>,
    pub capacity_kg: Option<i32>,
}

/// Response for a single machine.
#[derive(Debug, Serialize)]
pub struct MachineResponse {
    pub id: String,
    pub name: String,
    pub capacity_kg: i32,
    pub occupied: bool,

    /// Order currently using the machine.
    pub current_order_id: Option<OrderId>,

    pub assigned_at: Option<DateTime<Utc>>,

    /// When the running cycle is due to end.
    pub release_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Machine> for MachineResponse {
    fn from(m: Machine) -> Self {
        Self {
            id: m.id.to_string(),
            name: m.name,
            capacity_kg: m.capacity_kg,
            occupied: m.occupied,
            current_order_id: m.current_order_id,
            assigned_at: m.assigned_at,
            release_at: m.release_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Response for listing machines.
#[derive(Debug, Serialize)]
pub struct ListMachinesResponse {
    pub items: Vec<MachineResponse>,
    pub total: usize,
}

/// Response for an admin release.
#[derive(Debug, Serialize)]
pub struct ReleaseMachineResponse {
    /// False when the machine was already idle.
    pub released: bool,
    pub machine: MachineResponse,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a machine.
///
/// POST /v1/machines
async fn create_machine(
    State(state): State<AppState>,
    Json(req): Json<CreateMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let mut details = Vec::new();
    let name = req.name.trim();
    check_name(name, &mut details);
    check_capacity(req.capacity_kg, &mut details);
    if !details.is_empty() {
        return Err(ApiError::bad_request("invalid_machine", "Invalid machine")
            .with_details(details)
            .with_request_id(request_id.to_string()));
    }

    let machine = state
        .records()
        .create_machine(NewMachine {
            name: name.to_string(),
            capacity_kg: req.capacity_kg,
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(
        machine_id = %machine.id,
        request_id = %request_id,
        "Machine registered"
    );

    Ok((StatusCode::CREATED, Json(MachineResponse::from(machine))))
}

/// List machines.
///
/// GET /v1/machines
async fn list_machines(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let machines = state
        .records()
        .list_machines()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let items: Vec<MachineResponse> = machines.into_iter().map(Into::into).collect();
    let total = items.len();
    Ok(Json(ListMachinesResponse { items, total }))
}

/// Get one machine.
///
/// GET /v1/machines/{machine_id}
async fn get_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    let machine = state
        .records()
        .get_machine(machine_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    Ok(Json(MachineResponse::from(machine)))
}

/// Rename or resize a machine. Occupancy is untouched.
///
/// PATCH /v1/machines/{machine_id}
async fn update_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
    Json(req): Json<UpdateMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    let mut details = Vec::new();
    let name = req.name.as_deref().map(str::trim);
    if let Some(name) = name {
        check_name(name, &mut details);
    }
    if let Some(capacity_kg) = req.capacity_kg {
        check_capacity(capacity_kg, &mut details);
    }
    if !details.is_empty() {
        return Err(ApiError::bad_request("invalid_machine", "Invalid machine")
            .with_details(details)
            .with_request_id(request_id.to_string()));
    }

    let machine = state
        .records()
        .update_machine(
            machine_id,
            MachineUpdate {
                name: name.map(str::to_string),
                capacity_kg: req.capacity_kg,
            },
        )
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(machine_id = %machine_id, request_id = %request_id, "Machine updated");
    Ok(Json(MachineResponse::from(machine)))
}

/// Remove an idle machine.
///
/// DELETE /v1/machines/{machine_id}
async fn delete_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    state
        .records()
        .delete_machine(machine_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(machine_id = %machine_id, request_id = %request_id, "Machine removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Free a machine by hand. Its order goes back in the queue.
///
/// POST /v1/machines/{machine_id}/release
async fn release_machine(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let machine_id = parse_machine_id(&machine_id, &request_id)?;

    let released = state
        .records()
        .admin_release_machine(machine_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;
    let machine = state
        .records()
        .get_machine(machine_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    if released {
        tracing::warn!(
            machine_id = %machine_id,
            request_id = %request_id,
            "Machine released by admin"
        );
    }

    Ok(Json(ReleaseMachineResponse {
        released,
        machine: machine.into(),
    }))
}

fn check_name(name: &str, details: &mut Vec<FieldError>) {
    if name.is_empty() {
        details.push(FieldError::new("name", "Machine name cannot be empty"));
    } else if name.len() > MAX_NAME_LEN {
        details.push(FieldError::new(
            "name",
            format!("Machine name cannot exceed {MAX_NAME_LEN} characters"),
        ));
    }
}

fn check_capacity(capacity_kg: i32, details: &mut Vec<FieldError>) {
    if capacity_kg <= 0 {
        details.push(FieldError::new("capacity_kg", "Capacity must be positive"));
    }
}

fn parse_machine_id(raw: &str, request_id: &RequestId) -> Result<MachineId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_machine_id", "Invalid machine ID format")
            .with_request_id(request_id.to_string())
    })
}
