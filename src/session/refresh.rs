// Background session refresh

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::QueryCache;
use crate::error::RequestError;

use super::api::SessionApi;
use super::controller::{query_identity, IDENTITY_KEY};
use super::state::derive_session_state;
use super::types::{Identity, SessionState};

/// One refresh cycle: extend the session, then re-derive the identity.
///
/// A successful refresh invalidates the cached identity and refetches it
/// through the cache. A failed refresh leaves the cache untouched.
pub(crate) async fn refresh_cycle(
    api: &Arc<dyn SessionApi>,
    cache: &QueryCache<Option<Identity>>,
) -> Result<SessionState, RequestError> {
    api.refresh_session().await?;

    cache.invalidate(IDENTITY_KEY);
    let snapshot = query_identity(api, cache).await;
    derive_session_state(&snapshot)
}

/// Spawn the recurring refresh task.
///
/// The first refresh happens one full `period` after arming. The task ends by
/// itself once a refetch no longer yields an identity; a failed cycle is
/// logged and skipped.
pub(crate) fn spawn_refresh_loop(
    api: Arc<dyn SessionApi>,
    cache: QueryCache<Option<Identity>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            tracing::debug!("Refreshing session...");

            match refresh_cycle(&api, &cache).await {
                Ok(SessionState::Authenticated(identity)) => {
                    tracing::debug!(id = identity.id, "Session refreshed");
                }
                Ok(state) => {
                    tracing::info!(state = ?state, "Session ended, stopping refresh timer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Session refresh failed, trying again in {}s",
                        period.as_secs()
                    );
                }
            }
        }
    })
}
