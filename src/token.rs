//! Manage json web tokens.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_AUDIENCE: &str = "mailbox.local";
const JTI_LENGTH: usize = 16;

/// Errors raised while minting or checking a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token is invalid")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Which half of the pair a token is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
    /// Unique token identifier.
    pub jti: String,
    /// Token kind.
    pub typ: TokenKind,
}

/// Mint and verify one kind of JWT.
///
/// Each kind owns its secret: a leaked access secret cannot forge refresh
/// tokens and the other way around.
#[derive(Clone)]
pub struct TokenManager {
    kind: TokenKind,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    lifetime: u64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("kind", &self.kind)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    pub fn new(
        kind: TokenKind,
        issuer: impl Into<String>,
        secret: impl AsRef<[u8]>,
        lifetime: u64,
    ) -> Self {
        Self {
            kind,
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            issuer: issuer.into(),
            audience: DEFAULT_AUDIENCE.to_string(),
            lifetime,
        }
    }

    /// Set `audience` field on JWT.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Lifetime, in seconds, of minted tokens.
    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    /// Create a new token for `subject`, issued at `now`.
    pub fn create(
        &self,
        subject: &str,
        now: u64,
    ) -> Result<(String, Claims), TokenError> {
        let claims = Claims {
            aud: self.audience.clone(),
            exp: now + self.lifetime,
            iat: now,
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            jti: OsRng
                .sample_iter(&Alphanumeric)
                .take(JTI_LENGTH)
                .map(char::from)
                .collect(),
            typ: self.kind,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok((token, claims))
    }

    /// Decode and check a token against `now`.
    ///
    /// A token is expired from its `exp` instant onward.
    pub fn decode(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        // expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::Invalid)?
            .claims;

        if claims.typ != self.kind {
            return Err(TokenError::Invalid);
        }

        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn manager(kind: TokenKind, secret: &str) -> TokenManager {
        TokenManager::new(kind, "https://mail.example.com/", secret, 900)
    }

    #[test]
    fn test_create_and_decode() {
        let access = manager(TokenKind::Access, "access");
        let (token, claims) = access.create("u1", NOW).unwrap();

        assert!(token.is_ascii());
        assert_eq!(claims.exp, NOW + 900);
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.aud, DEFAULT_AUDIENCE);

        let decoded = access.decode(&token, NOW + 1).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_expiry_boundary() {
        let access = manager(TokenKind::Access, "access");
        let (token, claims) = access.create("u1", NOW).unwrap();

        assert!(access.decode(&token, claims.exp - 1).is_ok());
        assert!(matches!(
            access.decode(&token, claims.exp),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret_or_kind_is_invalid() {
        let access = manager(TokenKind::Access, "access");
        let refresh = manager(TokenKind::Refresh, "refresh");
        let forged = manager(TokenKind::Refresh, "access");

        let (access_token, _) = access.create("u1", NOW).unwrap();
        assert!(matches!(
            refresh.decode(&access_token, NOW),
            Err(TokenError::Invalid)
        ));
        // right secret, wrong kind.
        assert!(matches!(
            forged.decode(&access_token, NOW),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            access.decode("garbage", NOW),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_audience_mismatch_is_invalid() {
        let access = manager(TokenKind::Access, "access");
        let other = manager(TokenKind::Access, "access").with_audience("other");
        let (token, _) = access.create("u1", NOW).unwrap();

        assert!(matches!(other.decode(&token, NOW), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_tokens_are_unique() {
        let refresh = manager(TokenKind::Refresh, "refresh");
        let (first, _) = refresh.create("u1", NOW).unwrap();
        let (second, _) = refresh.create("u1", NOW).unwrap();

        assert_ne!(first, second);
    }
}
