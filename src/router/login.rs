//! Exchange a credential for a token pair.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::Result;
use crate::model::{LoginBody, LoginResponse, TOKEN_TYPE};
use crate::router::Valid;

/// Handler of `POST /auth/login`.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<LoginBody>,
) -> Result<Json<LoginResponse>> {
    let user = state
        .users
        .authenticate(&body.id, &body.password)
        .inspect_err(|err| tracing::info!(reason = %err, "authentication failed"))?;

    let pair = state.issuer.mint(&user.id).await?;

    tracing::info!(user_id = %user.id, "authentication successful");

    Ok(Json(LoginResponse {
        token_type: TOKEN_TYPE.to_owned(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in: state.issuer.access_lifetime(),
        user: user.info(),
    }))
}
