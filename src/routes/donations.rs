use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Donation, DonationPatch, DonationSort, DonationStatus, NewDonation};
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::routes::auth::AuthUser;
use crate::AppState;

/// Public read routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_donations))
        .route("/:id", get(get_donation))
}

/// Authenticated routes that change donation state.
pub fn mutations_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_donation))
        .route("/:id", put(update_donation).delete(delete_donation))
        .route("/:id/reserve", put(reserve_donation))
        .route("/:id/unreserve", put(unreserve_donation))
        .route("/:id/complete", put(complete_donation))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListDonationsQuery {
    pub status: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    pub title: String,
    pub description: String,
    pub quantity: String,
    pub expiry_date: DateTime<Utc>,
    pub pickup_address: String,
    pub pickup_time_start: DateTime<Utc>,
    pub pickup_time_end: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl CreateDonationRequest {
    fn validate(&self) -> AppResult<()> {
        check_pickup_window(Some(self.pickup_time_start), Some(self.pickup_time_end))
    }
}

impl From<CreateDonationRequest> for NewDonation {
    fn from(req: CreateDonationRequest) -> Self {
        NewDonation {
            title: req.title,
            description: req.description,
            quantity: req.quantity,
            expiry_date: req.expiry_date,
            pickup_address: req.pickup_address,
            pickup_time_start: req.pickup_time_start,
            pickup_time_end: req.pickup_time_end,
            image_url: req.image_url.filter(|u| !u.trim().is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DonationActionResponse {
    pub donation: Donation,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn check_pickup_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> AppResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end <= start => {
            Err(AppError::Validation(i18n::t("validation.pickup_window")))
        }
        _ => Ok(()),
    }
}

/// Malformed or incomplete bodies are validation errors, not axum's default 422.
fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

/// List donations, optionally filtered by status
async fn list_donations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDonationsQuery>,
) -> AppResult<Json<Vec<Donation>>> {
    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(value) => Some(DonationStatus::from_str(value).ok_or_else(|| {
            AppError::Validation(i18n::tr("validation.invalid_status", &[("value", value)]))
        })?),
    };
    let sort = match query.sort.as_deref() {
        None | Some("") => DonationSort::default(),
        Some(value) => DonationSort::from_str(value).ok_or_else(|| {
            AppError::Validation(i18n::tr("validation.invalid_sort", &[("value", value)]))
        })?,
    };

    let donations = state.queries.list_all(status, sort).await?;
    Ok(Json(donations))
}

async fn get_donation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Donation>> {
    Ok(Json(state.queries.get_by_id(&id).await?))
}

async fn create_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    payload: Result<Json<CreateDonationRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Donation>)> {
    let request = json_payload(payload)?;
    request.validate()?;

    let donation = state.engine.create(&caller, request.into()).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

/// Owner edit. Lifecycle keys in the body are ignored.
async fn update_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<DonationPatch>, JsonRejection>,
) -> AppResult<Json<Donation>> {
    let patch = json_payload(payload)?;
    check_pickup_window(patch.pickup_time_start, patch.pickup_time_end)?;

    let donation = state.engine.update(&caller, &id, patch).await?;
    Ok(Json(donation))
}

async fn delete_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    state.engine.delete(&caller, &id).await?;
    Ok(Json(MessageResponse {
        message: i18n::t("donation.deleted"),
    }))
}

async fn reserve_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DonationActionResponse>> {
    let donation = state.engine.reserve(&caller, &id).await?;
    let message = i18n::tr("donation.reserved", &[("title", &donation.title)]);
    Ok(Json(DonationActionResponse { donation, message }))
}

async fn unreserve_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DonationActionResponse>> {
    let donation = state.engine.unreserve(&caller, &id).await?;
    let message = if donation.status == DonationStatus::Expired {
        i18n::t("donation.unreserved_expired")
    } else {
        i18n::t("donation.unreserved")
    };
    Ok(Json(DonationActionResponse { donation, message }))
}

async fn complete_donation(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DonationActionResponse>> {
    let donation = state.engine.complete(&caller, &id).await?;
    Ok(Json(DonationActionResponse {
        donation,
        message: i18n::t("donation.completed"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::routes::testing::{send, TestApp};
    use chrono::Duration;
    use serde_json::{json, Value};

    fn create_body(expiry: Duration) -> Value {
        let now = Utc::now();
        json!({
            "title": "Bread, 10 loaves",
            "description": "Day-old sourdough",
            "quantity": "10 loaves",
            "expiryDate": now + expiry,
            "pickupAddress": "12 Baker St",
            "pickupTimeStart": now,
            "pickupTimeEnd": now + Duration::hours(2),
        })
    }

    async fn create(app: &TestApp, token: &str) -> String {
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/donations",
            Some(token),
            Some(create_body(Duration::days(1))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_requires_authentication() {
        let app = TestApp::new().await;
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/donations",
            None,
            Some(create_body(Duration::days(1))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = send(
            &app.router,
            "POST",
            "/api/donations",
            Some("garbage"),
            Some(create_body(Duration::days(1))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_uses_caller_identity_and_ignores_payload_owner() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);

        let mut body = create_body(Duration::days(1));
        body["donorId"] = json!("someone-else");
        body["status"] = json!("completed");
        let (status, created) =
            send(&app.router, "POST", "/api/donations", Some(&donor), Some(body)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["donorId"], "donor-1");
        assert_eq!(created["donorName"], "Corner Bakery");
        assert_eq!(created["status"], "available");
        assert!(created["reservedBy"].is_null());
    }

    #[tokio::test]
    async fn malformed_and_invalid_bodies_are_validation_errors() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/donations",
            Some(&donor),
            Some(json!({ "title": "No other fields" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let mut inverted = create_body(Duration::days(1));
        let start = inverted["pickupTimeStart"].clone();
        inverted["pickupTimeStart"] = inverted["pickupTimeEnd"].clone();
        inverted["pickupTimeEnd"] = start;
        let (status, body) =
            send(&app.router, "POST", "/api/donations", Some(&donor), Some(inverted)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn reserve_flow_over_http() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);
        let shelter_a = app.token("r-a", "Hope House", Role::Recipient);
        let shelter_b = app.token("r-b", "Safe Harbor", Role::Recipient);
        let id = create(&app, &donor).await;

        let uri = format!("/api/donations/{}/reserve", id);
        let (status, body) = send(&app.router, "PUT", &uri, Some(&shelter_a), None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["donation"]["status"], "reserved");
        assert_eq!(body["donation"]["reservedBy"], "r-a");
        assert_eq!(body["donation"]["reservedByName"], "Hope House");
        assert!(body["message"].as_str().unwrap().contains("Bread"));

        let (status, body) = send(&app.router, "PUT", &uri, Some(&shelter_b), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "STATE_CONFLICT");

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}/complete", id),
            Some(&shelter_a),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}/complete", id),
            Some(&donor),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["donation"]["status"], "completed");
    }

    #[tokio::test]
    async fn unreserve_returns_listing_to_available() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);
        let shelter = app.token("r-a", "Hope House", Role::Recipient);
        let id = create(&app, &donor).await;

        send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}/reserve", id),
            Some(&shelter),
            None,
        )
        .await;
        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}/unreserve", id),
            Some(&shelter),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["donation"]["status"], "available");
        assert!(body["donation"]["reservedBy"].is_null());
        assert!(body["donation"]["reservedAt"].is_null());
    }

    #[tokio::test]
    async fn update_ignores_lifecycle_fields() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);
        let id = create(&app, &donor).await;

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}", id),
            Some(&donor),
            Some(json!({
                "quantity": "8 loaves",
                "status": "completed",
                "reservedBy": "r-x",
                "donorId": "donor-9"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["quantity"], "8 loaves");
        assert_eq!(body["status"], "available");
        assert!(body["reservedBy"].is_null());
        assert_eq!(body["donorId"], "donor-1");
    }

    #[tokio::test]
    async fn list_filters_and_rejects_unknown_status() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);
        let shelter = app.token("r-a", "Hope House", Role::Recipient);
        let first = create(&app, &donor).await;
        create(&app, &donor).await;
        send(
            &app.router,
            "PUT",
            &format!("/api/donations/{}/reserve", first),
            Some(&shelter),
            None,
        )
        .await;

        let (status, body) = send(
            &app.router,
            "GET",
            "/api/donations?status=available",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app.router, "GET", "/api/donations", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) =
            send(&app.router, "GET", "/api/donations?status=gone", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_donation_is_not_found() {
        let app = TestApp::new().await;
        let donor = app.token("donor-1", "Corner Bakery", Role::Donor);

        let (status, body) = send(&app.router, "GET", "/api/donations/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, _) =
            send(&app.router, "DELETE", "/api/donations/nope", Some(&donor), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
