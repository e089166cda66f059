//! Client API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, RequestId};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, FieldError};
use crate::model::{Client, ClientUpdate, NewClient};
use crate::state::AppState;

const MAX_FIELD_LEN: usize = 200;

/// Create client routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_client).get(list_clients))
        .route(
            "/{client_id}",
            get(get_client).patch(update_client).delete(delete_client),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to register a client.
#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub email: String,
    pub address: String,
}

/// Request to change client details. Omitted fields are kept.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Response for a single client.
#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Client> for ClientResponse {
    fn from(c: Client) -> Self {
        Self {
            id: c.id.to_string(),
            name: c.name,
            email: c.email,
            address: c.address,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Response for listing clients.
#[derive(Debug, Serialize)]
pub struct ListClientsResponse {
    pub items: Vec<ClientResponse>,
    pub total: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a client. Emails are unique.
///
/// POST /v1/clients
async fn create_client(
    State(state): State<AppState>,
    Json(req): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let mut details = Vec::new();
    let name = check_text("name", &req.name, &mut details);
    let email = check_email(&req.email, &mut details);
    let address = check_text("address", &req.address, &mut details);
    if !details.is_empty() {
        return Err(ApiError::bad_request("invalid_client", "Invalid client")
            .with_details(details)
            .with_request_id(request_id.to_string()));
    }

    let client = state
        .records()
        .create_client(NewClient {
            name,
            email,
            address,
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(client_id = %client.id, request_id = %request_id, "Client registered");

    Ok((StatusCode::CREATED, Json(ClientResponse::from(client))))
}

/// GET /v1/clients
async fn list_clients(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let clients = state
        .records()
        .list_clients()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let items: Vec<ClientResponse> = clients.into_iter().map(Into::into).collect();
    let total = items.len();
    Ok(Json(ListClientsResponse { items, total }))
}

/// GET /v1/clients/{client_id}
async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let client_id = parse_client_id(&client_id, &request_id)?;

    let client = state
        .records()
        .get_client(client_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    Ok(Json(ClientResponse::from(client)))
}

/// PATCH /v1/clients/{client_id}
async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let client_id = parse_client_id(&client_id, &request_id)?;

    let mut details = Vec::new();
    let update = ClientUpdate {
        name: req
            .name
            .as_deref()
            .map(|raw| check_text("name", raw, &mut details)),
        email: req
            .email
            .as_deref()
            .map(|raw| check_email(raw, &mut details)),
        address: req
            .address
            .as_deref()
            .map(|raw| check_text("address", raw, &mut details)),
    };
    if !details.is_empty() {
        return Err(ApiError::bad_request("invalid_client", "Invalid client")
            .with_details(details)
            .with_request_id(request_id.to_string()));
    }

    let client = state
        .records()
        .update_client(client_id, update)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(client_id = %client_id, request_id = %request_id, "Client updated");
    Ok(Json(ClientResponse::from(client)))
}

/// Remove a client. Refused while any order references it.
///
/// DELETE /v1/clients/{client_id}
async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let client_id = parse_client_id(&client_id, &request_id)?;

    state
        .records()
        .delete_client(client_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(client_id = %client_id, request_id = %request_id, "Client removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Trims `raw` and records a field error when it is empty or too long.
fn check_text(field: &'static str, raw: &str, details: &mut Vec<FieldError>) -> String {
    let value = raw.trim();
    if value.is_empty() {
        details.push(FieldError::new(field, format!("{field} cannot be empty")));
    } else if value.len() > MAX_FIELD_LEN {
        details.push(FieldError::new(
            field,
            format!("{field} cannot exceed {MAX_FIELD_LEN} characters"),
        ));
    }
    value.to_string()
}

fn check_email(raw: &str, details: &mut Vec<FieldError>) -> String {
    let email = raw.trim().to_ascii_lowercase();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed || email.len() > MAX_FIELD_LEN {
        details.push(FieldError::new("email", "Invalid email address"));
    }
    email
}

fn parse_client_id(raw: &str, request_id: &RequestId) -> Result<ClientId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_client_id", "Invalid client ID format")
            .with_request_id(request_id.to_string())
    })
}
