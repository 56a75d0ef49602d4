// Session module
// Derives who is logged in from one cached identity fetch and keeps the session alive

mod api;
mod controller;
mod refresh;
mod state;
mod types;

pub use api::{HttpSessionApi, SessionApi};
pub use controller::{identity_query_options, SessionController, IDENTITY_KEY};
pub use state::derive_session_state;
pub use types::{Identity, Role, SessionState};
