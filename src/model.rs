//! Wire types shared by the HTTP routes and the client transport.

use std::fmt;

use serde::de::value::{self, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

pub const TOKEN_TYPE: &str = "Bearer";

/// Machine-distinguishable error code, sent as `type` on problem bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidCredential,
    AccessTokenExpired,
    AccessTokenInvalid,
    RefreshRevoked,
    RefreshExpired,
    RefreshInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::InvalidCredential => "invalid_credential",
            ErrorCode::AccessTokenExpired => "access_token_expired",
            ErrorCode::AccessTokenInvalid => "access_token_invalid",
            ErrorCode::RefreshRevoked => "refresh_revoked",
            ErrorCode::RefreshExpired => "refresh_expired",
            ErrorCode::RefreshInvalid => "refresh_invalid",
        }
    }

    /// Whether this code should start the client refresh protocol.
    pub fn is_access_token_failure(&self) -> bool {
        matches!(
            self,
            ErrorCode::AccessTokenExpired | ErrorCode::AccessTokenInvalid
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginBody {
    #[validate(length(min = 1, max = 64, message = "Identifier is required."))]
    pub id: String,
    #[validate(length(min = 1, max = 255, message = "Password is required."))]
    pub password: String,
}

/// Body of `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefreshBody {
    #[validate(length(min = 1, message = "Refresh token is required."))]
    pub refresh_token: String,
}

/// Public information on the authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Response of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: SubjectInfo,
}

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub token_type: String,
    pub access_token: String,
    pub expires_in: u64,
    /// Only present when refresh tokens are rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Problem body as read back by clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Problem {
    /// `None` when absent or not a known code.
    #[serde(rename = "type", default, deserialize_with = "known_code")]
    pub code: Option<ErrorCode>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: u16,
}

fn known_code<'de, D>(deserializer: D) -> Result<Option<ErrorCode>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(code) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let code: StrDeserializer<'_, value::Error> = code.as_str().into_deserializer();
    Ok(ErrorCode::deserialize(code).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serde_matches_as_str() {
        for code in [
            ErrorCode::Unauthenticated,
            ErrorCode::InvalidCredential,
            ErrorCode::AccessTokenExpired,
            ErrorCode::AccessTokenInvalid,
            ErrorCode::RefreshRevoked,
            ErrorCode::RefreshExpired,
            ErrorCode::RefreshInvalid,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_refresh_response_omits_missing_refresh_token() {
        let body = RefreshResponse {
            token_type: TOKEN_TYPE.into(),
            access_token: "a.b.c".into(),
            expires_in: 900,
            refresh_token: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("refresh_token").is_none());
    }

    #[test]
    fn test_problem_code() {
        let problem: Problem = serde_json::from_str(
            r#"{"type":"access_token_expired","title":"x","status":401}"#,
        )
        .unwrap();
        assert_eq!(problem.code, Some(ErrorCode::AccessTokenExpired));
        assert!(problem.code.unwrap().is_access_token_failure());
    }

    #[test]
    fn test_problem_unknown_code() {
        for body in [
            r#"{"type":"teapot","status":418}"#,
            r#"{"type":null,"status":500}"#,
            r#"{"title":"no type"}"#,
        ] {
            let problem: Problem = serde_json::from_str(body).unwrap();
            assert_eq!(problem.code, None);
        }
    }
}
