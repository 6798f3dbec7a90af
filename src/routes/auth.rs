use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::AppError;
use crate::services::identity::Caller;
use crate::AppState;

/// Extractor for the authenticated caller.
///
/// Resolves the bearer credential through the identity gate and records the
/// identity in the user directory so role-wide broadcasts can reach it.
pub struct AuthUser(pub Caller);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|e| {
                    tracing::debug!("Missing or invalid Authorization header: {}", e);
                    AppError::Unauthorized
                })?;

        let token = bearer.token().trim();
        if token.is_empty() {
            tracing::debug!("Empty bearer token in Authorization header");
            return Err(AppError::Unauthorized);
        }

        let caller = state.identity.resolve(token).await.map_err(|e| {
            tracing::debug!("Failed to resolve caller from token: {:?}", e);
            e
        })?;

        if let Err(e) = state
            .directory
            .remember(&caller.id, &caller.name, caller.role)
            .await
        {
            tracing::warn!(caller = %caller.id, "Failed to record caller in directory: {}", e);
        }

        tracing::debug!(caller = %caller.id, role = %caller.role, "Authenticated caller");
        Ok(AuthUser(caller))
    }
}
