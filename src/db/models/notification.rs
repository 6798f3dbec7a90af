use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An advisory message addressed to one user.
///
/// Created by the reservation engine as a side effect of a committed donation
/// transition; afterwards only its recipient marks it read or removes it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Insertion sequence; tie-breaker for rows sharing a timestamp.
    #[serde(skip)]
    pub seq: i64,
    /// Stable identifier (UUID), usable instead of a positional index.
    pub id: String,
    pub recipient_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
