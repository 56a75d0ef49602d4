use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::{QueryCache, QueryOptions, QuerySnapshot};
use crate::config::{Config, DEFAULT_REFRESH_INTERVAL_SECS};
use crate::error::RequestError;

use super::api::SessionApi;
use super::refresh;
use super::state::derive_session_state;
use super::types::{Identity, SessionState};

/// Cache key of the identity query
pub const IDENTITY_KEY: &str = "auth/user";

/// Fetch behaviour of the identity query: no retries, no focus or reconnect refetches
pub fn identity_query_options() -> QueryOptions {
    QueryOptions {
        retry: 0,
        refetch_on_window_focus: false,
        refetch_on_reconnect: false,
    }
}

/// Resolve the identity through the cache
pub(crate) async fn query_identity(
    api: &Arc<dyn SessionApi>,
    cache: &QueryCache<Option<Identity>>,
) -> QuerySnapshot<Option<Identity>> {
    let api = Arc::clone(api);
    cache
        .query(IDENTITY_KEY, identity_query_options(), move || {
            let api = Arc::clone(&api);
            async move { api.fetch_identity().await }
        })
        .await
}

/// Session controller
/// Single source of truth for "who is logged in", with a background refresh
/// while a session is active
///
/// Clones share state. The refresh timer is cancelled on `shutdown`, on
/// `logout`, when the session stops being authenticated, and when the last
/// clone is dropped.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    /// Remote session endpoints
    api: Arc<dyn SessionApi>,

    /// Cache holding the identity entry
    cache: QueryCache<Option<Identity>>,

    /// Period between silent refreshes
    refresh_interval: Duration,

    /// Live refresh task, if any
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.get_mut().take() {
            task.abort();
        }
    }
}

impl SessionController {
    /// Create a controller over a shared cache
    pub fn new(
        api: Arc<dyn SessionApi>,
        cache: QueryCache<Option<Identity>>,
        config: &Config,
    ) -> Self {
        // Tokio intervals reject a zero period
        let refresh_interval = if config.refresh_interval.is_zero() {
            tracing::warn!(
                "Refresh interval is zero, using {}s",
                DEFAULT_REFRESH_INTERVAL_SECS
            );
            Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS)
        } else {
            config.refresh_interval
        };

        Self {
            inner: Arc::new(ControllerInner {
                api,
                cache,
                refresh_interval,
                refresh_task: Mutex::new(None),
            }),
        }
    }

    /// Session state derived from the cached identity query.
    ///
    /// Never touches the network. Errors other than 401/403 are returned as
    /// `Err` so callers can tell "could not determine" from "logged out".
    pub fn current_identity(&self) -> Result<SessionState, RequestError> {
        derive_session_state(&self.snapshot())
    }

    /// Raw cache snapshot of the identity query
    pub fn snapshot(&self) -> QuerySnapshot<Option<Identity>> {
        self.inner.cache.snapshot(IDENTITY_KEY)
    }

    /// Resolve the identity (joining any fetch in flight) and arm or disarm
    /// the refresh timer to match the result.
    ///
    /// A settled result is served from the cache, errors included: after a
    /// network failure `load` keeps returning that error until `invalidate`
    /// is called.
    pub async fn load(&self) -> Result<SessionState, RequestError> {
        let snapshot = query_identity(&self.inner.api, &self.inner.cache).await;
        let state = derive_session_state(&snapshot);
        match &state {
            Ok(SessionState::Authenticated(identity)) => {
                tracing::debug!(id = identity.id, role = %identity.role, "Session authenticated")
            }
            Ok(other) => tracing::debug!(state = ?other, "Session not authenticated"),
            Err(e) => tracing::warn!(error = %e, "Could not determine session state"),
        }
        self.sync_refresh_timer(&state);
        state
    }

    /// Run one refresh cycle immediately.
    ///
    /// The refresh POST completes and the identity is invalidated before the
    /// refetch starts. The returned future resolves only once that refetch
    /// has settled, so it takes as long as both requests.
    pub async fn refresh_now(&self) -> Result<SessionState, RequestError> {
        let state = refresh::refresh_cycle(&self.inner.api, &self.inner.cache).await;
        match &state {
            Ok(_) => self.sync_refresh_timer(&state),
            Err(e) => tracing::warn!(error = %e, "Manual session refresh failed"),
        }
        state
    }

    /// End the session on the server and forget the cached identity.
    ///
    /// The local reset happens even if the server call fails.
    pub async fn logout(&self) -> Result<(), RequestError> {
        let result = self.inner.api.logout().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Logout request failed, clearing local session anyway");
        }
        self.reset();
        tracing::info!("Logged out");
        result
    }

    /// Mark the identity stale; the next `load` refetches it
    pub fn invalidate(&self) {
        self.inner.cache.invalidate(IDENTITY_KEY);
    }

    /// Forget the identity entirely; the state reads `Unknown` again
    pub fn reset(&self) {
        // Cache first: a concurrent arm re-checks the cache under the timer lock
        self.inner.cache.reset(IDENTITY_KEY);
        self.disarm_refresh_timer();
    }

    /// Stop background work
    pub fn shutdown(&self) {
        self.disarm_refresh_timer();
    }

    /// Whether a refresh task is currently live
    pub fn is_refresh_armed(&self) -> bool {
        self.inner
            .refresh_task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn sync_refresh_timer(&self, state: &Result<SessionState, RequestError>) {
        match state {
            Ok(SessionState::Authenticated(_)) => self.arm_refresh_timer(),
            _ => self.disarm_refresh_timer(),
        }
    }

    fn arm_refresh_timer(&self) {
        let mut slot = self.inner.refresh_task.lock();

        // The session may have ended since the caller derived its state
        if !matches!(self.current_identity(), Ok(SessionState::Authenticated(_))) {
            tracing::debug!("Session no longer authenticated, not arming refresh");
            return;
        }

        if let Some(task) = slot.as_ref() {
            if !task.is_finished() {
                return;
            }
        }
        if let Some(task) = slot.take() {
            task.abort();
        }

        *slot = Some(refresh::spawn_refresh_loop(
            Arc::clone(&self.inner.api),
            self.inner.cache.clone(),
            self.inner.refresh_interval,
        ));
        tracing::info!(
            "Session refresh armed (every {}s)",
            self.inner.refresh_interval.as_secs()
        );
    }

    fn disarm_refresh_timer(&self) {
        if let Some(task) = self.inner.refresh_task.lock().take() {
            let was_live = !task.is_finished();
            task.abort();
            if was_live {
                tracing::info!("Session refresh disarmed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use async_trait::async_trait;
    use serde_json::Map;

    struct StaticApi(Option<Identity>);

    #[async_trait]
    impl SessionApi for StaticApi {
        async fn fetch_identity(&self) -> Result<Option<Identity>, RequestError> {
            Ok(self.0.clone())
        }

        async fn refresh_session(&self) -> Result<(), RequestError> {
            Ok(())
        }

        async fn logout(&self) -> Result<(), RequestError> {
            Ok(())
        }
    }

    fn admin() -> Identity {
        Identity {
            id: 1,
            role: Role::Admin,
            attributes: Map::new(),
        }
    }

    fn controller(config: &Config) -> SessionController {
        SessionController::new(Arc::new(StaticApi(Some(admin()))), QueryCache::new(), config)
    }

    #[test]
    fn test_identity_query_options() {
        let options = identity_query_options();
        assert_eq!(options.retry, 0);
        assert!(!options.refetch_on_window_focus);
        assert!(!options.refetch_on_reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_authenticated_state_does_not_arm() {
        let controller = controller(&Config::new("http://localhost/api"));
        controller.load().await.unwrap();
        assert!(controller.is_refresh_armed());

        // Logout lands between a load's derivation and its timer sync
        let derived = controller.current_identity();
        controller.reset();
        controller.sync_refresh_timer(&derived);

        assert!(!controller.is_refresh_armed());
        assert_eq!(controller.current_identity(), Ok(SessionState::Unknown));
    }

    #[test]
    fn test_zero_refresh_interval_falls_back_to_default() {
        let mut config = Config::new("http://localhost/api");
        config.refresh_interval = Duration::ZERO;

        let controller = controller(&config);

        assert_eq!(
            controller.inner.refresh_interval,
            Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS)
        );
    }
}
