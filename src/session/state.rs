// Session state derivation

use crate::cache::{QuerySnapshot, QueryStatus};
use crate::error::RequestError;

use super::types::{Identity, SessionState};

/// Derive the session state from the cached identity query.
///
/// The snapshot is the only input; there is no separate "logged in" flag to
/// drift out of sync with it. Authentication failures (401/403) resolve to
/// `Unauthenticated`; every other failure is returned as an error because it
/// says nothing about whether a session exists.
pub fn derive_session_state(
    snapshot: &QuerySnapshot<Option<Identity>>,
) -> Result<SessionState, RequestError> {
    match snapshot.status {
        QueryStatus::Pending => Ok(SessionState::Unknown),
        QueryStatus::Error => match &snapshot.error {
            Some(e) if e.is_auth_failure() => Ok(SessionState::Unauthenticated),
            Some(e) => Err(e.clone()),
            None => Ok(SessionState::Unknown),
        },
        QueryStatus::Success => match &snapshot.data {
            Some(Some(identity)) => Ok(SessionState::Authenticated(identity.clone())),
            _ => Ok(SessionState::Unauthenticated),
        },
    }
}
