//! HTTP routes.
pub mod login;
pub mod logout;
pub mod refresh;
pub mod status;
pub mod users;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ServerError;

/// JSON body extractor running `validator` rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use crate::clock::FixedClock;
    use crate::config::Configuration;
    use crate::database::MemoryRefreshTokenRepository;
    use crate::issuer::tests::{NOW, issuer};
    use crate::user::tests::directory;
    use crate::AppState;

    pub const PASSWORD: &str = "P$soW%920$n&";

    /// State wired on in-memory collaborators.
    pub fn state() -> (AppState, Arc<FixedClock>) {
        state_with_rotation(false)
    }

    pub fn state_with_rotation(rotate: bool) -> (AppState, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(MemoryRefreshTokenRepository::new());
        let state = AppState {
            config: Arc::new(Configuration::default()),
            issuer: Arc::new(issuer(Arc::clone(&clock), store).with_rotation(rotate)),
            users: Arc::new(directory(PASSWORD)),
            metrics: None,
        };

        (state, clock)
    }
}
