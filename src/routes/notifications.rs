use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::Notification;
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications).delete(clear_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read", post(mark_read))
        .route("/by-id/:id", delete(delete_notification_by_id))
        .route("/:index", delete(delete_notification_at))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct NotificationsUpdatedResponse {
    pub message: String,
    pub affected: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Newest first. What was returned is marked read afterwards; the response
/// still carries the read flags as they were before this call. Anything
/// appended after the listing was read stays unread.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<Vec<Notification>>> {
    let items = state.ledger.list_for(&caller.id).await?;

    if let Some(through) = items.iter().filter(|n| !n.read).map(|n| n.seq).max() {
        if let Err(e) = state.ledger.mark_read_through(&caller.id, through).await {
            tracing::warn!(caller = %caller.id, "Failed to mark notifications read: {}", e);
        }
    }

    Ok(Json(items))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let count = state.ledger.unread_count(&caller.id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<NotificationsUpdatedResponse>> {
    let affected = state.ledger.mark_all_read(&caller.id).await?;
    Ok(Json(NotificationsUpdatedResponse {
        message: i18n::t("notifications.marked_read"),
        affected,
    }))
}

/// Delete by position in the current newest-first listing.
async fn delete_notification_at(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(index): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let index: i64 = index.parse().map_err(|_| {
        AppError::Validation(i18n::tr("validation.invalid_index", &[("value", &index)]))
    })?;

    if !state.ledger.delete_one(&caller.id, index).await? {
        return Err(AppError::NotFound(i18n::t("not_found.notification")));
    }

    Ok(Json(MessageResponse {
        message: i18n::t("notifications.deleted"),
    }))
}

async fn delete_notification_by_id(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    if !state.ledger.delete_by_id(&caller.id, &id).await? {
        return Err(AppError::NotFound(i18n::t("not_found.notification")));
    }

    Ok(Json(MessageResponse {
        message: i18n::t("notifications.deleted"),
    }))
}

async fn clear_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
) -> AppResult<Json<NotificationsUpdatedResponse>> {
    let affected = state.ledger.delete_all(&caller.id).await?;
    Ok(Json(NotificationsUpdatedResponse {
        message: i18n::t("notifications.cleared"),
        affected,
    }))
}

#[cfg(test)]
mod tests {
    use crate::db::Role;
    use crate::routes::testing::{send, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn listing_returns_unread_then_marks_read() {
        let app = TestApp::new().await;
        let token = app.token("r-a", "Hope House", Role::Recipient);
        app.state.ledger.append("r-a", "first").await.unwrap();
        app.state.ledger.append("r-a", "second").await.unwrap();

        let (_, body) = send(
            &app.router,
            "GET",
            "/api/notifications/unread-count",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["count"], 2);

        let (status, body) =
            send(&app.router, "GET", "/api/notifications", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["message"], "second");
        assert_eq!(items[0]["read"], false);

        let (_, body) = send(
            &app.router,
            "GET",
            "/api/notifications/unread-count",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn delete_by_index_and_by_id() {
        let app = TestApp::new().await;
        let token = app.token("r-a", "Hope House", Role::Recipient);
        let oldest = app.state.ledger.append("r-a", "oldest").await.unwrap();
        app.state.ledger.append("r-a", "newest").await.unwrap();

        let (status, _) =
            send(&app.router, "DELETE", "/api/notifications/0", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(&app.router, "DELETE", "/api/notifications/7", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) =
            send(&app.router, "DELETE", "/api/notifications/abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Invalid notification index: abc");

        let (status, _) = send(
            &app.router,
            "DELETE",
            &format!("/api/notifications/by-id/{}", oldest.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.state.ledger.list_for("r-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_only_touches_caller() {
        let app = TestApp::new().await;
        let token = app.token("r-a", "Hope House", Role::Recipient);
        app.state.ledger.append("r-a", "mine").await.unwrap();
        app.state.ledger.append("r-b", "theirs").await.unwrap();

        let (status, body) =
            send(&app.router, "DELETE", "/api/notifications", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["affected"], 1);
        assert_eq!(app.state.ledger.list_for("r-b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn new_listing_reaches_known_recipients() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);
        let shelter = app.token("r-a", "Hope House", Role::Recipient);

        // Any authenticated request registers the caller as a recipient.
        send(&app.router, "GET", "/api/notifications", Some(&shelter), None).await;

        let now = chrono::Utc::now();
        let (status, _) = send(
            &app.router,
            "POST",
            "/api/donations",
            Some(&donor),
            Some(serde_json::json!({
                "title": "Soup",
                "description": "Vegetable soup",
                "quantity": "5 litres",
                "expiryDate": now + chrono::Duration::days(1),
                "pickupAddress": "1 Kitchen Rd",
                "pickupTimeStart": now,
                "pickupTimeEnd": now + chrono::Duration::hours(1),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) =
            send(&app.router, "GET", "/api/notifications", Some(&shelter), None).await;
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["message"], "New donation posted: Soup");
    }
}
