//! Token issuer: mints token pairs, exchanges refresh tokens, revokes them.

use std::sync::Arc;

use crate::clock::Clock;
use crate::crypto::Hasher;
use crate::database::{RefreshTokenRepository, StoreError};
use crate::model::ErrorCode;
use crate::token::{Claims, TokenError, TokenManager};

pub type Result<T> = std::result::Result<T, IssuerError>;

/// Failures of the issuer. Refresh failures are terminal for the session.
#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("refresh token revoked")]
    Revoked,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token is invalid")]
    Invalid,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Token(TokenError),
}

impl IssuerError {
    /// Wire code of a refresh failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            IssuerError::Revoked => Some(ErrorCode::RefreshRevoked),
            IssuerError::Expired => Some(ErrorCode::RefreshExpired),
            IssuerError::Invalid => Some(ErrorCode::RefreshInvalid),
            _ => None,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            IssuerError::Revoked => "revoked",
            IssuerError::Expired => "expired",
            IssuerError::Invalid => "invalid",
            IssuerError::Store(_) => "store",
            IssuerError::Token(_) => "signing",
        }
    }
}

/// Freshly minted access and refresh tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

/// Result of a refresh exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed {
    pub access_token: String,
    pub access_claims: Claims,
    /// Replacement refresh token when rotation is enabled.
    pub refresh_token: Option<String>,
}

/// Server-side owner of the token lifecycle.
pub struct TokenIssuer {
    access: TokenManager,
    refresh: TokenManager,
    store: Arc<dyn RefreshTokenRepository>,
    hasher: Hasher,
    clock: Arc<dyn Clock>,
    rotate: bool,
}

impl TokenIssuer {
    /// Create a new [`TokenIssuer`].
    pub fn new(
        access: TokenManager,
        refresh: TokenManager,
        store: Arc<dyn RefreshTokenRepository>,
        hasher: Hasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            access,
            refresh,
            store,
            hasher,
            clock,
            rotate: false,
        }
    }

    /// Emit a new refresh token, and drop the presented one, on refresh.
    pub fn with_rotation(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    /// Access token lifetime in seconds.
    pub fn access_lifetime(&self) -> u64 {
        self.access.lifetime()
    }

    /// Mint an access and a refresh token for an authenticated subject.
    pub async fn mint(&self, subject: &str) -> Result<TokenPair> {
        let now = self.clock.now();
        let (access_token, access_claims) =
            self.access.create(subject, now).map_err(IssuerError::Token)?;
        let (refresh_token, refresh_claims) =
            self.refresh.create(subject, now).map_err(IssuerError::Token)?;

        self.store
            .store(
                &self.hasher.digest(&refresh_token),
                subject,
                refresh_claims.exp,
            )
            .await?;

        metrics::counter!("tokens_minted_total").increment(1);

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_claims,
            refresh_claims,
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Refreshed> {
        let result = self.exchange(refresh_token).await;

        match &result {
            Ok(refreshed) => {
                metrics::counter!("tokens_refreshed_total").increment(1);
                tracing::debug!(
                    subject = %refreshed.access_claims.sub,
                    rotated = refreshed.refresh_token.is_some(),
                    "access token refreshed"
                );
            },
            Err(err) => {
                metrics::counter!("token_refresh_failures_total", "reason" => err.reason())
                    .increment(1);
                tracing::info!(reason = err.reason(), "refresh rejected");
            },
        }

        result
    }

    async fn exchange(&self, refresh_token: &str) -> Result<Refreshed> {
        let digest = self.hasher.digest(refresh_token);

        let Some(subject) = self.store.find_subject(&digest).await? else {
            return Err(IssuerError::Revoked);
        };

        let now = self.clock.now();
        let claims = match self.refresh.decode(refresh_token, now) {
            Ok(claims) if claims.sub == subject => claims,
            Ok(_) | Err(TokenError::Invalid) | Err(TokenError::Signing(_)) => {
                self.store.revoke(&digest).await?;
                return Err(IssuerError::Invalid);
            },
            Err(TokenError::Expired) => {
                self.store.revoke(&digest).await?;
                return Err(IssuerError::Expired);
            },
        };

        let (access_token, access_claims) = self
            .access
            .create(&claims.sub, now)
            .map_err(IssuerError::Token)?;

        let refresh_token = if self.rotate {
            let (rotated, rotated_claims) = self
                .refresh
                .create(&claims.sub, now)
                .map_err(IssuerError::Token)?;
            self.store
                .store(
                    &self.hasher.digest(&rotated),
                    &claims.sub,
                    rotated_claims.exp,
                )
                .await?;
            self.store.revoke(&digest).await?;
            Some(rotated)
        } else {
            None
        };

        Ok(Refreshed {
            access_token,
            access_claims,
            refresh_token,
        })
    }

    /// Revoke a refresh token. Unknown tokens are ignored.
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        self.store
            .revoke(&self.hasher.digest(refresh_token))
            .await?;
        metrics::counter!("refresh_tokens_revoked_total").increment(1);
        Ok(())
    }

    /// Check an access token presented on a protected route.
    pub fn verify_access(&self, access_token: &str) -> std::result::Result<Claims, TokenError> {
        self.access.decode(access_token, self.clock.now())
    }

    /// Drop store entries whose refresh token already expired.
    pub async fn purge_expired(&self) -> Result<u64> {
        Ok(self.store.purge_expired(self.clock.now()).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::MemoryRefreshTokenRepository;
    use crate::token::TokenKind;

    pub const NOW: u64 = 1_700_000_000;
    pub const ACCESS_LIFETIME: u64 = 60 * 15;
    pub const REFRESH_LIFETIME: u64 = 60 * 60 * 24 * 7;

    pub fn issuer(
        clock: Arc<FixedClock>,
        store: Arc<MemoryRefreshTokenRepository>,
    ) -> TokenIssuer {
        let issuer = "https://mail.example.com/";
        TokenIssuer::new(
            TokenManager::new(TokenKind::Access, issuer, "access-secret", ACCESS_LIFETIME),
            TokenManager::new(TokenKind::Refresh, issuer, "refresh-secret", REFRESH_LIFETIME),
            store,
            Hasher::new("pepper"),
            clock,
        )
    }

    fn setup() -> (TokenIssuer, Arc<FixedClock>, Arc<MemoryRefreshTokenRepository>) {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(MemoryRefreshTokenRepository::new());
        (issuer(Arc::clone(&clock), Arc::clone(&store)), clock, store)
    }

    #[tokio::test]
    async fn test_login_refresh_revoke_scenario() {
        let (issuer, _clock, _store) = setup();

        let pair = issuer.mint("u1").await.unwrap();
        assert_eq!(pair.access_claims.exp - pair.access_claims.iat, 15 * 60);
        assert_eq!(
            pair.refresh_claims.exp - pair.refresh_claims.iat,
            7 * 24 * 60 * 60
        );

        let refreshed = issuer.refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(refreshed.access_claims.sub, "u1");
        assert_eq!(issuer.verify_access(&refreshed.access_token).unwrap().sub, "u1");
        assert!(refreshed.refresh_token.is_none());

        issuer.revoke(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(IssuerError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_consumed() {
        let (issuer, clock, _store) = setup();
        let pair = issuer.mint("u1").await.unwrap();

        let first = issuer.refresh(&pair.refresh_token).await.unwrap();
        clock.advance(1);
        let second = issuer.refresh(&pair.refresh_token).await.unwrap();

        assert_ne!(first.access_token, second.access_token);
        assert_eq!(second.access_claims.iat, NOW + 1);
    }

    #[tokio::test]
    async fn test_mint_twice_independently_revocable() {
        let (issuer, _clock, store) = setup();
        let first = issuer.mint("u1").await.unwrap();
        let second = issuer.mint("u1").await.unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(store.len(), 2);

        issuer.revoke(&first.refresh_token).await.unwrap();
        assert!(matches!(
            issuer.refresh(&first.refresh_token).await,
            Err(IssuerError::Revoked)
        ));
        assert!(issuer.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let (issuer, clock, store) = setup();
        let pair = issuer.mint("u1").await.unwrap();

        clock.set(pair.refresh_claims.exp - 1);
        assert!(issuer.refresh(&pair.refresh_token).await.is_ok());

        clock.set(pair.refresh_claims.exp);
        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(IssuerError::Expired)
        ));
        // stale entry is cleaned up.
        assert!(store.is_empty());
        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(IssuerError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_never_issued_token_is_revoked() {
        let (issuer, _clock, _store) = setup();
        assert!(matches!(
            issuer.refresh("never.issued.token").await,
            Err(IssuerError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let (issuer, _clock, store) = setup();
        let pair = issuer.mint("u1").await.unwrap();

        // pretend the access token was recorded as a refresh token.
        store
            .store(&Hasher::new("pepper").digest(&pair.access_token), "u1", u64::MAX)
            .await
            .unwrap();

        assert!(matches!(
            issuer.refresh(&pair.access_token).await,
            Err(IssuerError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (issuer, _clock, _store) = setup();
        issuer.revoke("unknown").await.unwrap();
        issuer.revoke("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation() {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(MemoryRefreshTokenRepository::new());
        let issuer = issuer(Arc::clone(&clock), Arc::clone(&store)).with_rotation(true);

        let pair = issuer.mint("u1").await.unwrap();
        let refreshed = issuer.refresh(&pair.refresh_token).await.unwrap();
        let rotated = refreshed.refresh_token.expect("rotated refresh token");

        assert_ne!(rotated, pair.refresh_token);
        assert_eq!(store.len(), 1);
        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(IssuerError::Revoked)
        ));
        assert!(issuer.refresh(&rotated).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (issuer, clock, store) = setup();
        issuer.mint("u1").await.unwrap();
        clock.advance(REFRESH_LIFETIME / 2);
        issuer.mint("u2").await.unwrap();

        clock.set(NOW + REFRESH_LIFETIME);
        assert_eq!(issuer.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
