use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, oneshot};

use crate::model::{LoginBody, RefreshResponse, SubjectInfo};

use super::{
    ApiRequest, ApiResponse, ClientError, RefreshFailure, StorageError, TokenStorage, Transport,
};

const EVENT_CAPACITY: usize = 16;

type Waiter = oneshot::Sender<Result<String, RefreshFailure>>;

/// Session changes, for the UI to follow.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn(SubjectInfo),
    Refreshed,
    /// The session is over; the user must log in again.
    Ended(RefreshFailure),
    LoggedOut,
}

enum Phase {
    Idle,
    /// Callers parked until the in-flight exchange settles.
    Refreshing(Vec<Waiter>),
}

struct State {
    access_token: Option<String>,
    phase: Phase,
    // bumped whenever the session changes, so a late exchange cannot revive it.
    generation: u64,
}

impl State {
    /// Start a new generation, rejecting callers parked on the previous one.
    ///
    /// Returns how many callers were rejected.
    fn next_generation(&mut self, failure: &RefreshFailure) -> usize {
        self.generation += 1;
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Refreshing(waiters) => {
                let count = waiters.len();
                for waiter in waiters {
                    // a dropped caller no longer cares.
                    let _ = waiter.send(Err(failure.clone()));
                }
                count
            },
            Phase::Idle => 0,
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
}

impl Inner {
    /// Run a storage operation on the blocking pool.
    async fn storage<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&dyn TokenStorage) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        match tokio::task::spawn_blocking(move || op(storage.as_ref())).await {
            Ok(result) => result,
            Err(err) => Err(StorageError::Io(std::io::Error::other(err))),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// End the session of `generation`: drop both tokens, reject every
    /// parked caller with `failure` and publish [`SessionEvent::Ended`].
    async fn end_session(&self, generation: u64, failure: RefreshFailure) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            tracing::debug!(reason = %failure, "session already changed, failure dropped");
            return;
        }

        state.access_token = None;
        if let Err(err) = self.storage(|storage| storage.clear()).await {
            tracing::error!(error = %err, "failed to clear refresh token");
        }
        let waiters = state.next_generation(&failure);
        drop(state);

        tracing::info!(reason = %failure, waiters, "session ended");
        self.emit(SessionEvent::Ended(failure));
    }
}

/// Wraps outbound API calls with the refresh protocol.
///
/// At most one refresh exchange is in flight at any time. Callers whose
/// access token is refused while it runs wait for its outcome, then replay
/// their call once with the new token.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Create a new [`RefreshCoordinator`].
    ///
    /// A refresh token left in `storage` by a previous run is used on the
    /// first refused call.
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn TokenStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                storage,
                state: Mutex::new(State {
                    access_token: None,
                    phase: Phase::Idle,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    /// Follow session changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Access token currently held in memory.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.lock().await.access_token.clone()
    }

    /// Exchange a credential for a session.
    ///
    /// Callers still waiting on a refresh of the previous session are
    /// rejected with [`RefreshFailure::Superseded`].
    pub async fn login(
        &self,
        id: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<SubjectInfo, ClientError> {
        let response = self
            .inner
            .transport
            .login(&LoginBody {
                id: id.into(),
                password: password.into(),
            })
            .await?;

        {
            let mut state = self.inner.state.lock().await;
            let refresh_token = response.refresh_token.clone();
            self.inner
                .storage(move |storage| storage.save(&refresh_token))
                .await?;
            state.next_generation(&RefreshFailure::Superseded);
            state.access_token = Some(response.access_token);
        }

        tracing::info!(user = %response.user.id, "logged in");
        self.inner.emit(SessionEvent::LoggedIn(response.user.clone()));

        Ok(response.user)
    }

    /// End the session.
    ///
    /// Local tokens are always dropped; revoking the refresh token on the
    /// server is best effort.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let refresh_token = {
            let mut state = self.inner.state.lock().await;
            state.next_generation(&RefreshFailure::Superseded);
            state.access_token = None;
            self.inner
                .storage(|storage| {
                    let token = storage.load();
                    storage.clear()?;
                    token
                })
                .await
        };

        if let Ok(Some(token)) = &refresh_token {
            if let Err(err) = self.inner.transport.logout(token).await {
                tracing::warn!(error = %err, "refresh token not revoked on logout");
            }
        }

        tracing::info!("logged out");
        self.inner.emit(SessionEvent::LoggedOut);

        refresh_token?;
        Ok(())
    }

    /// Send `request`, renewing the access token if the server refuses it.
    ///
    /// The call is replayed at most once. A network failure on either send
    /// ends the session like a failed refresh.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let (token, generation) = {
            let state = self.inner.state.lock().await;
            (state.access_token.clone(), state.generation)
        };

        let response = self.send(request, token.as_deref(), generation).await?;
        if !response.is_access_token_failure() {
            return Ok(response);
        }

        tracing::debug!(
            path = %request.path,
            code = ?response.error_code(),
            "access token refused"
        );
        let fresh = self.renew(token).await?;

        let replay = self.send(request, Some(&fresh), generation).await?;
        if replay.is_access_token_failure() {
            tracing::warn!(path = %request.path, "request refused after refresh");
            return Err(ClientError::Unauthorized(replay.error_code()));
        }

        Ok(replay)
    }

    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
        generation: u64,
    ) -> Result<ApiResponse, ClientError> {
        match self.inner.transport.send(request, access_token).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::warn!(path = %request.path, error = %err, "request failed");
                let failure = RefreshFailure::Transport(err);
                self.inner.end_session(generation, failure.clone()).await;
                Err(ClientError::SessionEnded(failure))
            },
        }
    }

    /// Obtain an access token newer than `stale`.
    async fn renew(&self, stale: Option<String>) -> Result<String, RefreshFailure> {
        let receiver = {
            let mut state = self.inner.state.lock().await;

            // someone already refreshed since `stale` was read. While an
            // exchange runs the current token is itself refused.
            if let (Phase::Idle, Some(current)) = (&state.phase, &state.access_token) {
                if stale.as_ref() != Some(current) {
                    return Ok(current.clone());
                }
            }

            let (sender, receiver) = oneshot::channel();
            if let Phase::Refreshing(waiters) = &mut state.phase {
                waiters.push(sender);
            } else {
                state.phase = Phase::Refreshing(vec![sender]);
                tokio::spawn(Self::exchange(
                    Arc::clone(&self.inner),
                    state.generation,
                ));
            }
            receiver
        };

        receiver.await.unwrap_or(Err(RefreshFailure::Interrupted))
    }

    /// Run one refresh exchange and settle every parked caller.
    ///
    /// Runs detached so that dropping the triggering call does not strand
    /// the others.
    async fn exchange(inner: Arc<Inner>, generation: u64) {
        match Self::request_refresh(&inner).await {
            Ok(response) => Self::complete(&inner, generation, response).await,
            Err(failure) => inner.end_session(generation, failure).await,
        }
    }

    async fn complete(inner: &Inner, generation: u64, response: RefreshResponse) {
        let mut state = inner.state.lock().await;
        if state.generation != generation {
            // parked callers were already rejected by the session change.
            tracing::debug!("session changed during refresh, outcome dropped");
            return;
        }

        if let Some(rotated) = response.refresh_token {
            if let Err(err) = inner.storage(move |storage| storage.save(&rotated)).await {
                tracing::error!(error = %err, "rotated refresh token not persisted");
            }
        }
        state.access_token = Some(response.access_token.clone());
        let waiters = match std::mem::replace(&mut state.phase, Phase::Idle) {
            Phase::Refreshing(waiters) => waiters,
            Phase::Idle => Vec::new(),
        };
        drop(state);

        tracing::debug!(waiters = waiters.len(), "access token refreshed");
        for waiter in waiters {
            let _ = waiter.send(Ok(response.access_token.clone()));
        }
        inner.emit(SessionEvent::Refreshed);
    }

    async fn request_refresh(inner: &Inner) -> Result<RefreshResponse, RefreshFailure> {
        let refresh_token = inner
            .storage(|storage| storage.load())
            .await
            .map_err(|err| RefreshFailure::Storage(err.to_string()))?
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        inner.transport.refresh(&refresh_token).await
    }
}
