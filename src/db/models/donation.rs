use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};
use crate::i18n;

/// Lifecycle state of a donation.
///
/// `available` → `reserved` → `completed`; `expired` is terminal and reached
/// lazily once the expiry date has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DonationStatus {
    Available,
    Reserved,
    Completed,
    Expired,
}

impl DonationStatus {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(DonationStatus::Available),
            "reserved" => Some(DonationStatus::Reserved),
            "completed" => Some(DonationStatus::Completed),
            "expired" => Some(DonationStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Available => "available",
            DonationStatus::Reserved => "reserved",
            DonationStatus::Completed => "completed",
            DonationStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub quantity: String,
    pub expiry_date: DateTime<Utc>,
    pub pickup_address: String,
    pub pickup_time_start: DateTime<Utc>,
    pub pickup_time_end: DateTime<Utc>,
    pub donor_id: String,
    /// Donor display name captured at creation; not refreshed if the name changes later.
    pub donor_name: String,
    pub status: DonationStatus,
    pub reserved_by: Option<String>,
    /// Holder display name captured at reservation time.
    pub reserved_by_name: Option<String>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    /// True once `now` is strictly past the expiry date.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }

    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.donor_id == identity
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.reserved_by.as_deref() == Some(identity)
    }
}

pub const MAX_TEXT_LEN: usize = 2000;

fn require_text(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(i18n::tr(
            "validation.required",
            &[("field", field)],
        )));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(AppError::Validation(i18n::tr(
            "validation.too_long",
            &[("field", field), ("max", &MAX_TEXT_LEN.to_string())],
        )));
    }
    Ok(())
}

/// Data required to list a new donation. Identity fields come from the caller,
/// never from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDonation {
    pub title: String,
    pub description: String,
    pub quantity: String,
    pub expiry_date: DateTime<Utc>,
    pub pickup_address: String,
    pub pickup_time_start: DateTime<Utc>,
    pub pickup_time_end: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl NewDonation {
    /// Required text fields must be present and non-blank.
    ///
    /// The pickup window ordering is checked by the request layer; the engine
    /// accepts any ordering.
    pub fn validate(&self) -> AppResult<()> {
        require_text("title", &self.title)?;
        require_text("description", &self.description)?;
        require_text("quantity", &self.quantity)?;
        require_text("pickupAddress", &self.pickup_address)?;
        Ok(())
    }
}

/// Owner edit of a donation's descriptive and logistics fields.
///
/// Lifecycle fields (`status`, `reservedBy`, `reservedByName`, `reservedAt`) are
/// deliberately absent: they change only through the dedicated transitions, and
/// any such keys in an update payload are dropped during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub pickup_address: Option<String>,
    pub pickup_time_start: Option<DateTime<Utc>>,
    pub pickup_time_end: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
}

impl DonationPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.quantity.is_none()
            && self.expiry_date.is_none()
            && self.pickup_address.is_none()
            && self.pickup_time_start.is_none()
            && self.pickup_time_end.is_none()
            && self.image_url.is_none()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.is_empty() {
            return Err(AppError::Validation(i18n::t("validation.empty_update")));
        }
        if let Some(v) = &self.title {
            require_text("title", v)?;
        }
        if let Some(v) = &self.description {
            require_text("description", v)?;
        }
        if let Some(v) = &self.quantity {
            require_text("quantity", v)?;
        }
        if let Some(v) = &self.pickup_address {
            require_text("pickupAddress", v)?;
        }
        Ok(())
    }
}

/// Lifecycle mutations applied through the store's compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    /// available → reserved, only while `at` has not passed the expiry date.
    Reserve {
        holder_id: String,
        holder_name: String,
        at: DateTime<Utc>,
    },
    /// reserved → available (or → expired when `at` is past the expiry date),
    /// only while `holder_id` still holds the reservation.
    Release {
        holder_id: String,
        at: DateTime<Utc>,
    },
    /// reserved → completed. Keeps the holder so the recipient's history shows it.
    Complete { at: DateTime<Utc> },
    /// available → expired, only when `at` is past the expiry date.
    Expire { at: DateTime<Utc> },
}

/// Sort orders supported by listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationSort {
    /// `createdAt` descending.
    #[default]
    Newest,
    Oldest,
    /// Soonest expiry first.
    Expiring,
}

impl DonationSort {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "newest" => Some(DonationSort::Newest),
            "oldest" => Some(DonationSort::Oldest),
            "expiring" => Some(DonationSort::Expiring),
            _ => None,
        }
    }
}

/// Conjunctive listing predicate. Empty `statuses` means any status.
#[derive(Debug, Clone, Default)]
pub struct DonationFilter {
    pub statuses: Vec<DonationStatus>,
    pub donor_id: Option<String>,
    pub reserved_by: Option<String>,
    pub sort: DonationSort,
}

impl DonationFilter {
    pub fn with_status(mut self, status: DonationStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn donor(mut self, donor_id: &str) -> Self {
        self.donor_id = Some(donor_id.to_string());
        self
    }

    pub fn reserved_by(mut self, holder_id: &str) -> Self {
        self.reserved_by = Some(holder_id.to_string());
        self
    }

    pub fn sorted(mut self, sort: DonationSort) -> Self {
        self.sort = sort;
        self
    }
}
