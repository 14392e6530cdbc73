//! HTTP transport wrapped by the refresh coordinator.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::model::{
    ErrorCode, LoginBody, LoginResponse, Problem, RefreshBody, RefreshResponse,
};

use super::{ClientError, RefreshFailure};

/// Network-level failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A replayable API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Answer of an API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Problem code of an error answer.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.status.is_success() {
            return None;
        }
        serde_json::from_slice::<Problem>(&self.body)
            .ok()
            .and_then(|problem| problem.code)
    }

    /// Whether the access token was refused.
    pub fn is_access_token_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            && self
                .error_code()
                .is_some_and(|code| code.is_access_token_failure())
    }

    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

/// Port for everything the client sends to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an API call, with the access token when there is one.
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, TransportError>;

    /// Exchange a credential for a token pair.
    async fn login(&self, body: &LoginBody) -> Result<LoginResponse, ClientError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailure>;

    /// Revoke a refresh token.
    async fn logout(&self, refresh_token: &str) -> Result<(), TransportError>;
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a new [`HttpTransport`] targeting `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse a configured client, e.g. with a timeout.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read(response: reqwest::Response) -> Result<ApiResponse, TransportError> {
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), self.url(&request.path));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Self::read(builder.send().await?).await
    }

    async fn login(&self, body: &LoginBody) -> Result<LoginResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(body)
            .send()
            .await
            .map_err(TransportError::from)?;
        let response = Self::read(response).await?;

        match response.status {
            status if status.is_success() => Ok(response.json()?),
            StatusCode::UNAUTHORIZED => Err(ClientError::InvalidCredential),
            StatusCode::BAD_REQUEST => Err(ClientError::Unauthenticated),
            status => Err(ClientError::Status(status)),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailure> {
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshBody {
                refresh_token: refresh_token.to_owned(),
            })
            .send()
            .await
            .map_err(|err| RefreshFailure::Transport(TransportError::from(err)))?;
        let response = Self::read(response).await.map_err(RefreshFailure::Transport)?;

        if response.status.is_success() {
            return response.json().map_err(RefreshFailure::Transport);
        }

        Err(match response.error_code() {
            Some(ErrorCode::RefreshRevoked) => RefreshFailure::Revoked,
            Some(ErrorCode::RefreshExpired) => RefreshFailure::Expired,
            Some(ErrorCode::RefreshInvalid) => RefreshFailure::Invalid,
            _ => RefreshFailure::Rejected(response.status),
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), TransportError> {
        self.client
            .post(self.url("/auth/logout"))
            .json(&RefreshBody {
                refresh_token: refresh_token.to_owned(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
