use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};

/// Per-recipient queue of advisory messages.
///
/// Listing order is newest first. Positional operations (`delete_one`) are
/// resolved against that order at the moment the call executes.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn append(&self, recipient_id: &str, message: &str) -> AppResult<Notification>;

    /// Append the same message for many recipients; all rows or none.
    async fn append_many(&self, recipient_ids: &[String], message: &str) -> AppResult<u64>;

    async fn list_for(&self, recipient_id: &str) -> AppResult<Vec<Notification>>;

    async fn unread_count(&self, recipient_id: &str) -> AppResult<i64>;

    async fn mark_all_read(&self, recipient_id: &str) -> AppResult<u64>;

    /// Mark read only rows appended at or before `seq`; later appends stay unread.
    async fn mark_read_through(&self, recipient_id: &str, seq: i64) -> AppResult<u64>;

    /// Delete the notification at `index` in the recipient's current listing order.
    async fn delete_one(&self, recipient_id: &str, index: i64) -> AppResult<bool>;

    async fn delete_by_id(&self, recipient_id: &str, id: &str) -> AppResult<bool>;

    async fn delete_all(&self, recipient_id: &str) -> AppResult<u64>;
}

const NOTIFICATION_COLUMNS: &str = "seq, id, recipient_id, message, read, created_at";

/// Rows per multi-value INSERT; keeps well under SQLite's bind parameter limit.
const APPEND_CHUNK: usize = 200;

// ============================================================================
// Notification Repository
// ============================================================================

#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for NotificationRepository {
    async fn append(&self, recipient_id: &str, message: &str) -> AppResult<Notification> {
        let sql = format!(
            r#"
            INSERT INTO notifications (id, recipient_id, message, read, created_at)
            VALUES (?, ?, ?, 0, ?)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(recipient_id)
            .bind(message)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn append_many(&self, recipient_ids: &[String], message: &str) -> AppResult<u64> {
        if recipient_ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        let mut inserted = 0u64;

        for chunk in recipient_ids.chunks(APPEND_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO notifications (id, recipient_id, message, read, created_at) ",
            );
            qb.push_values(chunk, |mut row, recipient_id| {
                row.push_bind(Uuid::new_v4().to_string())
                    .push_bind(recipient_id.clone())
                    .push_bind(message.to_string())
                    .push_bind(false)
                    .push_bind(now);
            });

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(inserted)
    }

    async fn list_for(&self, recipient_id: &str) -> AppResult<Vec<Notification>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM notifications
            WHERE recipient_id = ?
            ORDER BY julianday(created_at) DESC, seq DESC
            "#,
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&sql)
            .bind(recipient_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn unread_count(&self, recipient_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND read = 0",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn mark_all_read(&self, recipient_id: &str) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE notifications SET read = 1 WHERE recipient_id = ? AND read = 0")
                .bind(recipient_id)
                .execute(&self.pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    async fn mark_read_through(&self, recipient_id: &str, seq: i64) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ? AND seq <= ? AND read = 0",
        )
        .bind(recipient_id)
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_one(&self, recipient_id: &str, index: i64) -> AppResult<bool> {
        if index < 0 {
            return Ok(false);
        }

        // Resolve the index and delete in one statement so the position is
        // evaluated against the ordering at execution time.
        let result = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE seq = (
                SELECT seq FROM notifications
                WHERE recipient_id = ?
                ORDER BY julianday(created_at) DESC, seq DESC
                LIMIT 1 OFFSET ?
            )
            "#,
        )
        .bind(recipient_id)
        .bind(index)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id(&self, recipient_id: &str, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE recipient_id = ? AND id = ?")
            .bind(recipient_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, recipient_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE recipient_id = ?")
            .bind(recipient_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
