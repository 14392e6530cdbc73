//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::{Result, ServerError};

const BEARER: &str = "Bearer ";

/// Require a valid access token, exposing its claims to the handler.
///
/// An absent, malformed or expired token is answered with a 401 whose code
/// lets clients start a refresh.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ServerError::AccessTokenInvalid)?;

    let claims = state.issuer.verify_access(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
