//! Revoke a refresh token.

use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::Result;
use crate::model::RefreshBody;
use crate::router::Valid;

/// Handler of `POST /auth/logout`. Always succeeds on a well-formed body.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<RefreshBody>,
) -> Result<StatusCode> {
    state.issuer.revoke(&body.refresh_token).await?;

    tracing::debug!("refresh token revoked");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::issuer::IssuerError;
    use crate::router::tests::state;
    use crate::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_logout_handler() {
        let (state, _clock) = state();
        let pair = state.issuer.mint("u1").await.unwrap();

        for _ in 0..2 {
            let response = make_request(
                None,
                app(state.clone()),
                Method::POST,
                "/auth/logout",
                json!({ "refresh_token": pair.refresh_token }).to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        assert!(matches!(
            state.issuer.refresh(&pair.refresh_token).await,
            Err(IssuerError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_logout_unknown_token() {
        let (state, _clock) = state();

        let response = make_request(
            None,
            app(state),
            Method::POST,
            "/auth/logout",
            json!({ "refresh_token": "never-issued" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
