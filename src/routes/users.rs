use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::db::{Donation, Role};
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/donor", get(my_donations))
        .route("/reserved", get(my_reservations))
        .route("/reserved/active", get(my_active_reservations))
}

// ============================================================================
// Handlers
// ============================================================================

/// Everything the calling donor has listed
async fn my_donations(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<Vec<Donation>>> {
    caller.require_role(Role::Donor)?;
    Ok(Json(state.queries.by_donor(&caller.id).await?))
}

/// Reservations held by the calling recipient, including completed pickups
async fn my_reservations(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<Vec<Donation>>> {
    caller.require_role(Role::Recipient)?;
    Ok(Json(state.queries.reservation_history(&caller.id).await?))
}

async fn my_active_reservations(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<Vec<Donation>>> {
    caller.require_role(Role::Recipient)?;
    Ok(Json(state.queries.reserved_by_active(&caller.id).await?))
}
