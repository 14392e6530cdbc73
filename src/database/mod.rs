//! Revocation store for refresh tokens.
//!
//! Maps a refresh token digest to its subject. A refresh token is honored
//! only while its entry exists.
mod memory;
mod postgres;

pub use memory::MemoryRefreshTokenRepository;
pub use postgres::PgRefreshTokenRepository;

use async_trait::async_trait;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "mailbox";
pub const DEFAULT_POOL_SIZE: u32 = 10;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Port for the server-side refresh token record.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Record `digest` as a live refresh token of `subject`.
    async fn store(&self, digest: &str, subject: &str, expires_at: u64) -> Result<()>;

    /// Subject of a live refresh token.
    async fn find_subject(&self, digest: &str) -> Result<Option<String>>;

    /// Remove an entry. Removing an absent entry is not an error.
    async fn revoke(&self, digest: &str) -> Result<()>;

    /// Remove every entry expired at `now`. Returns how many were dropped.
    async fn purge_expired(&self, now: u64) -> Result<u64>;
}
