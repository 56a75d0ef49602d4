// Session Keeper - cookie-based API client and session controller

pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod session;

pub use cache::{QueryCache, QueryOptions, QuerySnapshot, QueryStatus};
pub use config::Config;
pub use error::{FailureBody, RequestError, NETWORK_STATUS};
pub use http_client::{ApiClient, HttpMethod};
pub use session::{HttpSessionApi, Identity, Role, SessionApi, SessionController, SessionState};
