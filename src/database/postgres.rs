//! PostgreSQL refresh token store.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{RefreshTokenRepository, Result};

/// PostgreSQL refresh token repository.
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    /// Init database connections and run migrations.
    pub async fn connect(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool).connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new [`PgRefreshTokenRepository`] over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn store(&self, digest: &str, subject: &str, expires_at: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token, subject, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token) DO UPDATE SET subject = $2, expires_at = $3
            "#,
        )
        .bind(digest)
        .bind(subject)
        .bind(expires_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_subject(&self, digest: &str) -> Result<Option<String>> {
        let record = sqlx::query_as::<_, (String,)>(
            "SELECT subject FROM refresh_tokens WHERE token = $1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|(subject,)| subject))
    }

    async fn revoke(&self, digest: &str) -> Result<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(digest)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self, now: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
