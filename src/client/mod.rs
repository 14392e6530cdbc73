//! Client half of the session.
//!
//! Every API call goes through a [`RefreshCoordinator`], which renews an
//! expired access token once for all concurrent callers, replays their
//! calls, and ends the session when the refresh token is refused.
mod coordinator;
mod storage;
mod transport;

pub use coordinator::{RefreshCoordinator, SessionEvent};
pub use storage::{FileStorage, MemoryStorage, REFRESH_TOKEN_KEY, StorageError, TokenStorage};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};

use reqwest::StatusCode;

use crate::model::ErrorCode;

/// Why a refresh exchange did not produce an access token.
///
/// Every variant but [`RefreshFailure::Superseded`] ends the session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("refresh token was revoked")]
    Revoked,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token is invalid")]
    Invalid,
    #[error("no refresh token stored")]
    MissingRefreshToken,
    #[error("refresh endpoint answered {0}")]
    Rejected(StatusCode),
    #[error(transparent)]
    Transport(TransportError),
    #[error("token storage failed: {0}")]
    Storage(String),
    /// A login or logout happened while the exchange was in flight.
    #[error("session changed during refresh")]
    Superseded,
    #[error("refresh task stopped before answering")]
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("missing or malformed credential")]
    Unauthenticated,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// The call was still refused after a successful refresh.
    #[error("request refused after refresh ({0:?})")]
    Unauthorized(Option<ErrorCode>),
    #[error("session ended: {0}")]
    SessionEnded(#[from] RefreshFailure),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
