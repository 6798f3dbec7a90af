use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::*;
use crate::error::{AppError, AppResult};

/// Durable record of donations and their lifecycle state.
///
/// `conditional_update` is the only primitive used for lifecycle transitions.
/// Implementations must apply it atomically: the write happens only if the
/// stored status still equals `expected` at commit time.
#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn insert(&self, donation: &Donation) -> AppResult<Donation>;

    async fn get_by_id(&self, id: &str) -> AppResult<Option<Donation>>;

    async fn find_by_filter(&self, filter: &DonationFilter) -> AppResult<Vec<Donation>>;

    /// Apply `transition` if the donation is currently in `expected`.
    /// `Ok(None)` means the guard did not match (missing row or conflict).
    async fn conditional_update(
        &self,
        id: &str,
        expected: DonationStatus,
        transition: &StatusTransition,
    ) -> AppResult<Option<Donation>>;

    /// Merge `patch` into a donation owned by `donor_id`.
    async fn update_owned(
        &self,
        id: &str,
        donor_id: &str,
        patch: &DonationPatch,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Donation>>;

    async fn delete_owned(&self, id: &str, donor_id: &str) -> AppResult<bool>;

    /// Mark every `available` donation whose expiry has passed as `expired`.
    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

const DONATION_COLUMNS: &str = r#"
    id, title, description, quantity, expiry_date,
    pickup_address, pickup_time_start, pickup_time_end,
    donor_id, donor_name, status,
    reserved_by, reserved_by_name, reserved_at,
    image_url, created_at, updated_at
"#;

// ============================================================================
// Donation Repository
// ============================================================================

/// SQLite-backed listing store.
///
/// Implementation notes:
/// - Every transition is one `UPDATE ... WHERE id = ? AND status = ? ... RETURNING`
///   statement, so the status check and the write cannot interleave with
///   another writer. No transaction is held between engine steps.
/// - Timestamps are compared with `julianday()` because the stored text
///   representation has a variable number of fractional digits.
#[derive(Clone)]
pub struct DonationRepository {
    pool: SqlitePool,
}

impl DonationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DonationStore for DonationRepository {
    async fn insert(&self, donation: &Donation) -> AppResult<Donation> {
        let sql = format!(
            r#"
            INSERT INTO donations ({cols})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {cols}
            "#,
            cols = DONATION_COLUMNS
        );

        sqlx::query_as::<_, Donation>(&sql)
            .bind(&donation.id)
            .bind(&donation.title)
            .bind(&donation.description)
            .bind(&donation.quantity)
            .bind(donation.expiry_date)
            .bind(&donation.pickup_address)
            .bind(donation.pickup_time_start)
            .bind(donation.pickup_time_end)
            .bind(&donation.donor_id)
            .bind(&donation.donor_name)
            .bind(donation.status)
            .bind(&donation.reserved_by)
            .bind(&donation.reserved_by_name)
            .bind(donation.reserved_at)
            .bind(&donation.image_url)
            .bind(donation.created_at)
            .bind(donation.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Option<Donation>> {
        let sql = format!("SELECT {} FROM donations WHERE id = ?", DONATION_COLUMNS);

        sqlx::query_as::<_, Donation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn find_by_filter(&self, filter: &DonationFilter) -> AppResult<Vec<Donation>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM donations WHERE 1 = 1",
            DONATION_COLUMNS
        ));

        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(*status);
            }
            separated.push_unseparated(")");
        }

        if let Some(donor_id) = &filter.donor_id {
            qb.push(" AND donor_id = ").push_bind(donor_id.clone());
        }

        if let Some(holder_id) = &filter.reserved_by {
            qb.push(" AND reserved_by = ").push_bind(holder_id.clone());
        }

        qb.push(match filter.sort {
            DonationSort::Newest => " ORDER BY julianday(created_at) DESC, rowid DESC",
            DonationSort::Oldest => " ORDER BY julianday(created_at) ASC, rowid ASC",
            DonationSort::Expiring => " ORDER BY julianday(expiry_date) ASC, rowid ASC",
        });

        qb.build_query_as::<Donation>()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: DonationStatus,
        transition: &StatusTransition,
    ) -> AppResult<Option<Donation>> {
        let row = match transition {
            StatusTransition::Reserve {
                holder_id,
                holder_name,
                at,
            } => {
                let sql = format!(
                    r#"
                    UPDATE donations
                    SET
                        status = 'reserved',
                        reserved_by = ?,
                        reserved_by_name = ?,
                        reserved_at = ?,
                        updated_at = ?
                    WHERE id = ?
                      AND status = ?
                      AND julianday(expiry_date) >= julianday(?)
                    RETURNING {}
                    "#,
                    DONATION_COLUMNS
                );
                sqlx::query_as::<_, Donation>(&sql)
                    .bind(holder_id)
                    .bind(holder_name)
                    .bind(*at)
                    .bind(*at)
                    .bind(id)
                    .bind(expected)
                    .bind(*at)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Release { holder_id, at } => {
                let sql = format!(
                    r#"
                    UPDATE donations
                    SET
                        status = CASE
                            WHEN julianday(?) > julianday(expiry_date) THEN 'expired'
                            ELSE 'available'
                        END,
                        reserved_by = NULL,
                        reserved_by_name = NULL,
                        reserved_at = NULL,
                        updated_at = ?
                    WHERE id = ?
                      AND status = ?
                      AND reserved_by = ?
                    RETURNING {}
                    "#,
                    DONATION_COLUMNS
                );
                sqlx::query_as::<_, Donation>(&sql)
                    .bind(*at)
                    .bind(*at)
                    .bind(id)
                    .bind(expected)
                    .bind(holder_id)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Complete { at } => {
                let sql = format!(
                    r#"
                    UPDATE donations
                    SET status = 'completed', updated_at = ?
                    WHERE id = ? AND status = ?
                    RETURNING {}
                    "#,
                    DONATION_COLUMNS
                );
                sqlx::query_as::<_, Donation>(&sql)
                    .bind(*at)
                    .bind(id)
                    .bind(expected)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Expire { at } => {
                let sql = format!(
                    r#"
                    UPDATE donations
                    SET
                        status = 'expired',
                        reserved_by = NULL,
                        reserved_by_name = NULL,
                        reserved_at = NULL,
                        updated_at = ?
                    WHERE id = ?
                      AND status = ?
                      AND julianday(?) > julianday(expiry_date)
                    RETURNING {}
                    "#,
                    DONATION_COLUMNS
                );
                sqlx::query_as::<_, Donation>(&sql)
                    .bind(*at)
                    .bind(id)
                    .bind(expected)
                    .bind(*at)
                    .fetch_optional(&self.pool)
                    .await
            }
        };

        row.map_err(AppError::Database)
    }

    async fn update_owned(
        &self,
        id: &str,
        donor_id: &str,
        patch: &DonationPatch,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Donation>> {
        let sql = format!(
            r#"
            UPDATE donations
            SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                quantity = COALESCE(?, quantity),
                expiry_date = COALESCE(?, expiry_date),
                pickup_address = COALESCE(?, pickup_address),
                pickup_time_start = COALESCE(?, pickup_time_start),
                pickup_time_end = COALESCE(?, pickup_time_end),
                image_url = COALESCE(?, image_url),
                updated_at = ?
            WHERE id = ? AND donor_id = ?
            RETURNING {}
            "#,
            DONATION_COLUMNS
        );

        sqlx::query_as::<_, Donation>(&sql)
            .bind(&patch.title)
            .bind(&patch.description)
            .bind(&patch.quantity)
            .bind(patch.expiry_date)
            .bind(&patch.pickup_address)
            .bind(patch.pickup_time_start)
            .bind(patch.pickup_time_end)
            .bind(&patch.image_url)
            .bind(at)
            .bind(id)
            .bind(donor_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn delete_owned(&self, id: &str, donor_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM donations WHERE id = ? AND donor_id = ?")
            .bind(id)
            .bind(donor_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE donations
            SET status = 'expired', updated_at = ?
            WHERE status = 'available'
              AND julianday(expiry_date) < julianday(?)
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{donation_fixture, memory_pool};
    use chrono::Duration;

    #[tokio::test]
    async fn reserve_guard_rejects_second_writer() {
        let repo = DonationRepository::new(memory_pool().await);
        let d = repo.insert(&donation_fixture("donor-1", 1)).await.unwrap();
        let now = Utc::now();

        let first = repo
            .conditional_update(
                &d.id,
                DonationStatus::Available,
                &StatusTransition::Reserve {
                    holder_id: "r-a".into(),
                    holder_name: "A".into(),
                    at: now,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.unwrap().reserved_by.as_deref(), Some("r-a"));

        let second = repo
            .conditional_update(
                &d.id,
                DonationStatus::Available,
                &StatusTransition::Reserve {
                    holder_id: "r-b".into(),
                    holder_name: "B".into(),
                    at: now,
                },
            )
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = repo.get_by_id(&d.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved_by.as_deref(), Some("r-a"));
    }

    #[tokio::test]
    async fn reserve_guard_rejects_lapsed_donation() {
        let repo = DonationRepository::new(memory_pool().await);
        let d = repo.insert(&donation_fixture("donor-1", -1)).await.unwrap();

        let result = repo
            .conditional_update(
                &d.id,
                DonationStatus::Available,
                &StatusTransition::Reserve {
                    holder_id: "r-a".into(),
                    holder_name: "A".into(),
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn release_requires_current_holder_and_clears_fields() {
        let repo = DonationRepository::new(memory_pool().await);
        let d = repo.insert(&donation_fixture("donor-1", 1)).await.unwrap();
        let now = Utc::now();
        repo.conditional_update(
            &d.id,
            DonationStatus::Available,
            &StatusTransition::Reserve {
                holder_id: "r-a".into(),
                holder_name: "A".into(),
                at: now,
            },
        )
        .await
        .unwrap();

        let wrong = repo
            .conditional_update(
                &d.id,
                DonationStatus::Reserved,
                &StatusTransition::Release {
                    holder_id: "r-b".into(),
                    at: now,
                },
            )
            .await
            .unwrap();
        assert!(wrong.is_none());

        let released = repo
            .conditional_update(
                &d.id,
                DonationStatus::Reserved,
                &StatusTransition::Release {
                    holder_id: "r-a".into(),
                    at: now,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released.status, DonationStatus::Available);
        assert!(released.reserved_by.is_none());
        assert!(released.reserved_by_name.is_none());
        assert!(released.reserved_at.is_none());
    }

    #[tokio::test]
    async fn filter_and_sort() {
        let repo = DonationRepository::new(memory_pool().await);
        let mut older = donation_fixture("donor-1", 3);
        older.created_at = Utc::now() - Duration::hours(2);
        let older = repo.insert(&older).await.unwrap();
        let newer = repo.insert(&donation_fixture("donor-2", 1)).await.unwrap();

        let all = repo.find_by_filter(&DonationFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec![newer.id.as_str(), older.id.as_str()]
        );

        let expiring = repo
            .find_by_filter(&DonationFilter::default().sorted(DonationSort::Expiring))
            .await
            .unwrap();
        assert_eq!(expiring[0].id, newer.id);

        let mine = repo
            .find_by_filter(&DonationFilter::default().donor("donor-1"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, older.id);

        let reserved = repo
            .find_by_filter(&DonationFilter::default().with_status(DonationStatus::Reserved))
            .await
            .unwrap();
        assert!(reserved.is_empty());
    }

    #[tokio::test]
    async fn update_owned_keeps_unpatched_fields_and_owner() {
        let repo = DonationRepository::new(memory_pool().await);
        let d = repo.insert(&donation_fixture("donor-1", 1)).await.unwrap();

        let patch = DonationPatch {
            title: Some("Rolls".into()),
            ..Default::default()
        };
        assert!(repo
            .update_owned(&d.id, "donor-2", &patch, Utc::now())
            .await
            .unwrap()
            .is_none());

        let updated = repo
            .update_owned(&d.id, "donor-1", &patch, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Rolls");
        assert_eq!(updated.description, d.description);
        assert_eq!(updated.donor_id, "donor-1");
        assert_eq!(updated.status, DonationStatus::Available);
    }

    #[tokio::test]
    async fn expire_lapsed_only_touches_available_past_expiry() {
        let repo = DonationRepository::new(memory_pool().await);
        let lapsed = repo.insert(&donation_fixture("donor-1", -1)).await.unwrap();
        let fresh = repo.insert(&donation_fixture("donor-1", 1)).await.unwrap();

        assert_eq!(repo.expire_lapsed(Utc::now()).await.unwrap(), 1);
        let lapsed = repo.get_by_id(&lapsed.id).await.unwrap().unwrap();
        let fresh = repo.get_by_id(&fresh.id).await.unwrap().unwrap();
        assert_eq!(lapsed.status, DonationStatus::Expired);
        assert_eq!(fresh.status, DonationStatus::Available);
    }

    #[tokio::test]
    async fn delete_owned_checks_owner() {
        let repo = DonationRepository::new(memory_pool().await);
        let d = repo.insert(&donation_fixture("donor-1", 1)).await.unwrap();

        assert!(!repo.delete_owned(&d.id, "donor-2").await.unwrap());
        assert!(repo.delete_owned(&d.id, "donor-1").await.unwrap());
        assert!(repo.get_by_id(&d.id).await.unwrap().is_none());
    }
}
