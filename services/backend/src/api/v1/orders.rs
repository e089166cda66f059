//! Order API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use lavanderia_id::{ClientId, MachineId, OrderId, RequestId};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, FieldError};
use crate::model::{NewOrder, Order, OrderUpdate, ServiceKind};
use crate::state::AppState;

/// Create order routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route(
            "/{order_id}",
            get(get_order).patch(update_order).delete(delete_order),
        )
        .route("/{order_id}/fulfill", post(fulfill_order))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to place an order.
///
/// Services arrive as plain strings so an unknown kind can be reported as a
/// field error instead of a body rejection.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub client_id: String,
    pub services: Vec<String>,
}

/// Request to change an order that is waiting for a machine.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderRequest {
    pub client_id: Option<String>,
    pub services: Option<Vec<String>>,
}

/// Response for a single order.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub client_id: ClientId,
    pub services: Vec<ServiceKind>,
    pub fulfilled: bool,

    /// True while a machine cycle is running.
    pub ongoing: bool,

    pub machine_id: Option<MachineId>,
    pub cycle_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            id: o.id.to_string(),
            client_id: o.client_id,
            services: o.services,
            fulfilled: o.fulfilled,
            ongoing: o.ongoing,
            machine_id: o.machine_id,
            cycle_completed_at: o.cycle_completed_at,
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

/// Response for listing orders.
#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub items: Vec<OrderResponse>,
    pub total: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// Place an order.
///
/// POST /v1/orders
async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let mut details = Vec::new();
    let client_id = parse_client_field(&req.client_id, &mut details);
    let services = parse_services(&req.services, &mut details);

    let client_id = match client_id {
        Some(id) if details.is_empty() => id,
        _ => {
            return Err(ApiError::bad_request("invalid_order", "Invalid order")
                .with_details(details)
                .with_request_id(request_id.to_string()));
        }
    };

    let order = state
        .records()
        .create_order(NewOrder {
            client_id,
            services,
        })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(
        order_id = %order.id,
        requires_machine = order.requires_machine(),
        request_id = %request_id,
        "Order placed"
    );

    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

/// List orders, oldest first.
///
/// GET /v1/orders
async fn list_orders(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let orders = state
        .records()
        .list_orders()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    let items: Vec<OrderResponse> = orders.into_iter().map(Into::into).collect();
    let total = items.len();
    Ok(Json(ListOrdersResponse { items, total }))
}

/// GET /v1/orders/{order_id}
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let order_id = parse_order_id(&order_id, &request_id)?;

    let order = state
        .records()
        .get_order(order_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    Ok(Json(OrderResponse::from(order)))
}

/// Change the client or services of a waiting order.
///
/// PATCH /v1/orders/{order_id}
async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let order_id = parse_order_id(&order_id, &request_id)?;

    let mut details = Vec::new();
    let client_id = req
        .client_id
        .as_deref()
        .and_then(|raw| parse_client_field(raw, &mut details));
    let services = req
        .services
        .as_deref()
        .map(|raw| parse_services(raw, &mut details));
    if !details.is_empty() {
        return Err(ApiError::bad_request("invalid_order", "Invalid order")
            .with_details(details)
            .with_request_id(request_id.to_string()));
    }

    let order = state
        .records()
        .update_order(order_id, OrderUpdate { client_id, services })
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(order_id = %order_id, request_id = %request_id, "Order updated");
    Ok(Json(OrderResponse::from(order)))
}

/// Remove an order that is not in a machine cycle.
///
/// DELETE /v1/orders/{order_id}
async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let order_id = parse_order_id(&order_id, &request_id)?;

    state
        .records()
        .delete_order(order_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(order_id = %order_id, request_id = %request_id, "Order removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Mark an order fulfilled. Refused while its machine cycle is running.
///
/// POST /v1/orders/{order_id}/fulfill
async fn fulfill_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();
    let order_id = parse_order_id(&order_id, &request_id)?;

    let order = state
        .records()
        .mark_order_fulfilled(order_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(order_id = %order_id, request_id = %request_id, "Order fulfilled");
    Ok(Json(OrderResponse::from(order)))
}

fn parse_client_field(raw: &str, details: &mut Vec<FieldError>) -> Option<ClientId> {
    match raw.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            details.push(FieldError::new("client_id", "Invalid client ID format"));
            None
        }
    }
}

fn parse_services(raw: &[String], details: &mut Vec<FieldError>) -> Vec<ServiceKind> {
    if raw.is_empty() {
        details.push(FieldError::new("services", "At least one service is required"));
    }

    let mut services = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        match name.parse::<ServiceKind>() {
            Ok(kind) => services.push(kind),
            Err(e) => details.push(FieldError::new(format!("services[{i}]"), e.to_string())),
        }
    }
    services
}

fn parse_order_id(raw: &str, request_id: &RequestId) -> Result<OrderId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_order_id", "Invalid order ID format")
            .with_request_id(request_id.to_string())
    })
}
