//! Get a new access token with a refresh token.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::Result;
use crate::model::{RefreshBody, RefreshResponse, TOKEN_TYPE};
use crate::router::Valid;

/// Handler of `POST /auth/refresh`.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<RefreshBody>,
) -> Result<Json<RefreshResponse>> {
    let refreshed = state.issuer.refresh(&body.refresh_token).await?;

    Ok(Json(RefreshResponse {
        token_type: TOKEN_TYPE.to_owned(),
        access_token: refreshed.access_token,
        expires_in: state.issuer.access_lifetime(),
        refresh_token: refreshed.refresh_token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{state, state_with_rotation};
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn refresh(app: Router, token: &str) -> (StatusCode, serde_json::Value) {
        let response = make_request(
            None,
            app,
            Method::POST,
            "/auth/refresh",
            json!({ "refresh_token": token }).to_string(),
        )
        .await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_handler() {
        let (state, _clock) = state();
        let pair = state.issuer.mint("u1").await.unwrap();

        let (status, body) = refresh(app(state.clone()), &pair.refresh_token).await;
        assert_eq!(status, StatusCode::OK);

        let body: RefreshResponse = serde_json::from_value(body).unwrap();
        assert_eq!(body.token_type, TOKEN_TYPE);
        assert!(body.refresh_token.is_none());
        assert_eq!(state.issuer.verify_access(&body.access_token).unwrap().sub, "u1");
    }

    #[tokio::test]
    async fn test_refresh_after_revoke() {
        let (state, _clock) = state();
        let pair = state.issuer.mint("u1").await.unwrap();
        state.issuer.revoke(&pair.refresh_token).await.unwrap();

        let (status, body) = refresh(app(state), &pair.refresh_token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "refresh_revoked");
    }

    #[tokio::test]
    async fn test_refresh_expired() {
        let (state, clock) = state();
        let pair = state.issuer.mint("u1").await.unwrap();
        clock.set(pair.refresh_claims.exp);

        let (status, body) = refresh(app(state), &pair.refresh_token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "refresh_expired");
    }

    #[tokio::test]
    async fn test_refresh_with_rotation() {
        let (state, _clock) = state_with_rotation(true);
        let pair = state.issuer.mint("u1").await.unwrap();

        let (status, body) = refresh(app(state.clone()), &pair.refresh_token).await;
        assert_eq!(status, StatusCode::OK);
        let body: RefreshResponse = serde_json::from_value(body).unwrap();
        let rotated = body.refresh_token.expect("rotated refresh token");

        let (status, body) = refresh(app(state.clone()), &pair.refresh_token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "refresh_revoked");

        let (status, _) = refresh(app(state), &rotated).await;
        assert_eq!(status, StatusCode::OK);
    }
}
