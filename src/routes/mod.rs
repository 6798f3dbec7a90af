use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub mod auth;
pub mod donations;
pub mod health;
pub mod notifications;
pub mod users;

/// Routes nested under `/api`.
///
/// `donation_mutations` is merged into the donations router so the caller can
/// layer it (e.g. with the rate limiter) independently of the read routes.
pub fn api_router(donation_mutations: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/donations", donations::router().merge(donation_mutations))
        .nest("/user", users::router())
        .nest("/notifications", notifications::router())
}
