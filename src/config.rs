use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::time::Duration;

/// Default period between silent session refreshes (30 minutes)
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30 * 60;

/// Session probe - keeps an authenticated API session alive
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL every endpoint is appended to (e.g. https://board.example.com/api)
    #[arg(short = 'u', long, env = "SESSION_BASE_URL")]
    pub base_url: Option<String>,

    /// Endpoint returning the current identity
    #[arg(long, env = "SESSION_IDENTITY_ENDPOINT", default_value = "/auth/user")]
    pub identity_endpoint: String,

    /// Endpoint extending the server-side session
    #[arg(long, env = "SESSION_REFRESH_ENDPOINT", default_value = "/auth/refresh")]
    pub refresh_endpoint: String,

    /// Endpoint ending the server-side session
    #[arg(long, env = "SESSION_LOGOUT_ENDPOINT", default_value = "/auth/logout")]
    pub logout_endpoint: String,

    /// Seconds between silent session refreshes
    #[arg(long, env = "SESSION_REFRESH_INTERVAL", default_value_t = DEFAULT_REFRESH_INTERVAL_SECS)]
    pub refresh_interval: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Immutable settings shared by the request client and the session controller.
///
/// Built once at startup, then handed around behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Config {
    // Remote API
    pub base_url: String,
    pub identity_endpoint: String,
    pub refresh_endpoint: String,
    pub logout_endpoint: String,

    // Session
    pub refresh_interval: Duration,

    // HTTP client
    pub http_connect_timeout: Duration,
    pub http_request_timeout: Duration,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Config with default endpoints and timeouts for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            identity_endpoint: "/auth/user".to_string(),
            refresh_endpoint: "/auth/refresh".to_string(),
            logout_endpoint: "/auth/logout".to_string(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            http_connect_timeout: Duration::from_secs(10),
            http_request_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }

    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let base_url = args
            .base_url
            .context("SESSION_BASE_URL is required (use -u or set SESSION_BASE_URL env var)")?;

        Ok(Config {
            base_url,
            identity_endpoint: args.identity_endpoint,
            refresh_endpoint: args.refresh_endpoint,
            logout_endpoint: args.logout_endpoint,
            refresh_interval: Duration::from_secs(args.refresh_interval),
            http_connect_timeout: Duration::from_secs(args.connect_timeout),
            http_request_timeout: Duration::from_secs(args.http_timeout),
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("SESSION_BASE_URL is not a valid URL: {}", self.base_url))?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!(
                "SESSION_BASE_URL must use http or https, got: {}",
                url.scheme()
            );
        }

        if self.refresh_interval.is_zero() {
            anyhow::bail!("SESSION_REFRESH_INTERVAL must be greater than zero");
        }

        Ok(())
    }
}
