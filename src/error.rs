//! Error handler for the auth server.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::issuer::IssuerError;
use crate::model::ErrorCode;
use crate::token::TokenError;
use crate::user::CredentialError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("access token expired")]
    AccessTokenExpired,

    #[error("missing or invalid 'Authorization' header")]
    AccessTokenInvalid,

    #[error(transparent)]
    Refresh(IssuerError),

    #[error("user not found")]
    UserNotFound,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    pub fn internal<E>(details: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.to_owned(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<IssuerError> for ServerError {
    fn from(err: IssuerError) -> Self {
        match err {
            IssuerError::Revoked | IssuerError::Expired | IssuerError::Invalid => {
                ServerError::Refresh(err)
            },
            err => ServerError::internal("token issuer failed", err),
        }
    }
}

impl From<TokenError> for ServerError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ServerError::AccessTokenExpired,
            TokenError::Invalid => ServerError::AccessTokenInvalid,
            err => ServerError::internal("token signing failed", err),
        }
    }
}

impl From<CredentialError> for ServerError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Invalid => ServerError::InvalidCredential,
            CredentialError::Crypto(err) => {
                ServerError::internal("password verification failed", err)
            },
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `type` field with a machine readable code.
    pub fn code(mut self, code: ErrorCode) -> Self {
        self.r#type = Some(code.as_str().to_owned());
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST)
            .code(ErrorCode::Unauthenticated);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::Axum(err) => response.details(&err.body_text()),

            ServerError::InvalidCredential => response
                .title("Invalid identifier or password.")
                .status(StatusCode::UNAUTHORIZED)
                .code(ErrorCode::InvalidCredential),

            ServerError::AccessTokenExpired => response
                .title("Access token expired.")
                .status(StatusCode::UNAUTHORIZED)
                .code(ErrorCode::AccessTokenExpired),

            ServerError::AccessTokenInvalid => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED)
                .code(ErrorCode::AccessTokenInvalid),

            ServerError::UserNotFound => ResponseError::default()
                .title("User not found.")
                .details(&self.to_string())
                .status(StatusCode::NOT_FOUND),

            ServerError::Refresh(err) => {
                let response = response
                    .title("Refresh token rejected.")
                    .status(StatusCode::UNAUTHORIZED);
                match err.code() {
                    Some(code) => response.code(code),
                    None => response,
                }
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
