use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::Role;
use crate::error::{AppError, AppResult};

/// Directory of identities the identity gate has resolved.
///
/// Used to address role-wide broadcasts such as the new-listing notice.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Record (or refresh) an identity with its current display name and role.
    async fn remember(&self, id: &str, display_name: &str, role: Role) -> AppResult<()>;

    async fn ids_with_role(&self, role: Role) -> AppResult<Vec<String>>;
}

// ============================================================================
// User Repository
// ============================================================================

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn remember(&self, id: &str, display_name: &str, role: Role) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, role, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(role)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn ids_with_role(&self, role: Role) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE role = ? ORDER BY id")
            .bind(role)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }
}
