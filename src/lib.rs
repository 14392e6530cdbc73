//! Authentication core of the mailbox dashboard.
//!
//! The server half issues access and refresh tokens; the [`client`] half
//! wraps outbound API calls and keeps a single refresh in flight.
#![forbid(unsafe_code)]

pub mod client;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod issuer;
mod middleware;
pub mod model;
mod router;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::clock::SystemClock;
use crate::crypto::{Hasher, PasswordManager};
use crate::database::{
    MemoryRefreshTokenRepository, PgRefreshTokenRepository, RefreshTokenRepository,
};
use crate::issuer::TokenIssuer;
use crate::token::{DEFAULT_AUDIENCE, TokenKind, TokenManager};
use crate::user::UserDirectory;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub issuer: Arc<TokenIssuer>,
    pub users: Arc<UserDirectory>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let auth_router = Router::new()
        // `POST /auth/login` goes to `login`.
        .route("/login", post(router::login::handler))
        // `POST /auth/refresh` goes to `refresh`.
        .route("/refresh", post(router::refresh::handler))
        // `POST /auth/logout` goes to `logout`.
        .route("/logout", post(router::logout::handler));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::metrics))
        .nest("/auth", auth_router)
        .nest("/users", router::users::router(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let store: Arc<dyn RefreshTokenRepository> = match config.postgres {
        Some(ref config) => Arc::new(
            PgRefreshTokenRepository::connect(
                &config.address,
                config
                    .username
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .password
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .database
                    .as_deref()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?,
        ),
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, refresh tokens are kept in memory"
            );
            Arc::new(MemoryRefreshTokenRepository::new())
        },
    };

    // handle jwt.
    let (access_secret, refresh_secret) = config.token.secrets()?;
    let audience = config
        .token
        .audience
        .clone()
        .unwrap_or_else(|| DEFAULT_AUDIENCE.to_owned());
    let access = TokenManager::new(
        TokenKind::Access,
        &config.url,
        &access_secret,
        config.token.access_lifetime,
    )
    .with_audience(&audience);
    let refresh = TokenManager::new(
        TokenKind::Refresh,
        &config.url,
        &refresh_secret,
        config.token.refresh_lifetime,
    )
    .with_audience(&audience);

    let issuer = TokenIssuer::new(
        access,
        refresh,
        store,
        Hasher::new(&refresh_secret),
        Arc::new(SystemClock::new()),
    )
    .with_rotation(config.token.rotate_refresh_tokens);

    let users = UserDirectory::new(
        config.users.clone(),
        PasswordManager::new(config.argon2.clone())?,
    );
    if config.users.is_empty() {
        tracing::warn!("no `users` entry on `config.yaml` file, nobody can log in");
    }

    Ok(AppState {
        config,
        issuer: Arc::new(issuer),
        users: Arc::new(users),
        metrics,
    })
}
