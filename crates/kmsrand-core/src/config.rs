//! Client configuration.
//!
//! Everything the HTTP client needs is passed in explicitly through
//! [`ClientOptions`]. [`ClientOptions::from_env`] is a convenience for reading
//! the usual environment variables once, at construction time.

use std::time::Duration;

/// Public Cloud KMS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://cloudkms.googleapis.com";

/// Overrides [`ClientOptions::endpoint`] (e.g. to point at an emulator).
pub const ENDPOINT_ENV: &str = "KMSRAND_ENDPOINT";

/// OAuth2 bearer token used to authenticate requests.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Default `User-Agent` header.
pub fn default_user_agent() -> String {
    format!("kmsrand/{}", crate::VERSION)
}

/// Options for [`KmsClient`](crate::KmsClient).
#[derive(Clone)]
pub struct ClientOptions {
    /// Base URL of the service, without a trailing `/v1`.
    pub endpoint: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Bearer token. Connecting without one fails.
    pub access_token: Option<String>,
    /// Per-request deadline. `None` waits for the service indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: default_user_agent(),
            access_token: None,
            timeout: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("endpoint", &self.endpoint)
            .field("user_agent", &self.user_agent)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientOptions {
    /// Defaults overridden by [`ENDPOINT_ENV`] and [`ACCESS_TOKEN_ENV`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut options = Self::default();
        if let Some(endpoint) = get(ENDPOINT_ENV) {
            options.endpoint = endpoint;
        }
        options.access_token = get(ACCESS_TOKEN_ENV);
        options
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
