//! Users-related HTTP API.

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router, middleware};

use crate::error::{Result, ServerError};
use crate::model::SubjectInfo;
use crate::token::Claims;
use crate::AppState;

/// Subject of the presented access token.
async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SubjectInfo>> {
    state
        .users
        .find_by_id(&claims.sub)
        .map(|user| Json(user.info()))
        .ok_or(ServerError::UserNotFound)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users/@me` goes to `me`. Authorization required.
        .route("/@me", get(me))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::authenticate,
        ))
}
