//! Configuration management for the SDK.

use std::env;
use std::time::Duration;

/// Default API root; the app id is appended to it.
pub const DEFAULT_BASE_URL: &str = "https://api.supportive.io/apps/";

/// Default delay between two message polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(60_000);

/// API resources below an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Users,
    Messages,
}

impl Resource {
    /// Path of the resource, relative to the app url.
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Users => "/users/",
            Resource::Messages => "/messages/",
        }
    }
}

/// SDK configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// API root, e.g. `https://api.supportive.io/apps/`
    pub base_url: String,
    /// Application id issued by Supportive
    pub app_id: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Delay between two message polls
    pub poll_interval: Duration,
}

impl Config {
    /// Configuration with defaults for everything but the app id.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: app_id.into(),
            api_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Absolute url of `resource` for the configured app.
    pub fn endpoint(&self, resource: Resource) -> String {
        format!("{}{}{}", self.base_url, self.app_id, resource.path())
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_id = env::var("SUPPORTIVE_APP_ID").map_err(|_| ConfigError::MissingAppId)?;

        let base_url =
            env::var("SUPPORTIVE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let api_token = env::var("SUPPORTIVE_API_TOKEN").ok();

        let poll_interval = match env::var("SUPPORTIVE_POLL_INTERVAL_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidPollInterval)?,
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            base_url,
            app_id,
            api_token,
            poll_interval,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SUPPORTIVE_APP_ID environment variable is required")]
    MissingAppId,

    #[error("Invalid SUPPORTIVE_POLL_INTERVAL_MS value")]
    InvalidPollInterval,
}
