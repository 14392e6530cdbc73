//! In-process refresh token store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RefreshTokenRepository, Result};

#[derive(Debug, Clone)]
struct Entry {
    subject: String,
    expires_at: u64,
}

/// Refresh token store kept in memory, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenRepository {
    entries: DashMap<String, Entry>,
}

impl MemoryRefreshTokenRepository {
    /// Create a new [`MemoryRefreshTokenRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn store(&self, digest: &str, subject: &str, expires_at: u64) -> Result<()> {
        self.entries.insert(
            digest.to_owned(),
            Entry {
                subject: subject.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn find_subject(&self, digest: &str) -> Result<Option<String>> {
        Ok(self.entries.get(digest).map(|entry| entry.subject.clone()))
    }

    async fn revoke(&self, digest: &str) -> Result<()> {
        self.entries.remove(digest);
        Ok(())
    }

    async fn purge_expired(&self, now: u64) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok((before - self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_find_revoke() {
        let repo = MemoryRefreshTokenRepository::new();
        repo.store("digest", "u1", 100).await.unwrap();

        assert_eq!(repo.find_subject("digest").await.unwrap().as_deref(), Some("u1"));
        assert_eq!(repo.find_subject("other").await.unwrap(), None);

        repo.revoke("digest").await.unwrap();
        assert_eq!(repo.find_subject("digest").await.unwrap(), None);
        // idempotent.
        repo.revoke("digest").await.unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let repo = MemoryRefreshTokenRepository::new();
        repo.store("old", "u1", 100).await.unwrap();
        repo.store("edge", "u1", 200).await.unwrap();
        repo.store("new", "u2", 300).await.unwrap();

        assert_eq!(repo.purge_expired(200).await.unwrap(), 2);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.find_subject("new").await.unwrap().as_deref(), Some("u2"));
    }
}
