//! API v1 routes.

mod clients;
mod machines;
mod orders;
mod scheduler;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/clients", clients::routes())
        .nest("/machines", machines::routes())
        .nest("/orders", orders::routes())
        .nest("/scheduler", scheduler::routes())
}
