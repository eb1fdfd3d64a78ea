//! Client configuration

use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// CAS endpoint URL
    pub endpoint: String,
    /// Bearer token passed through on every API request
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Whether upload sessions query the global dedup endpoint
    pub enable_global_dedup: bool,
    /// Whether whole-file downloads re-derive and check the file hash
    pub verify_downloads: bool,
    /// Bound on in-flight requests within a session phase
    pub max_concurrent_requests: usize,
    /// User agent string
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            enable_global_dedup: true,
            verify_downloads: false,
            max_concurrent_requests: 8,
            user_agent: format!("xet-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Create a new config with the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable global dedup queries
    pub fn with_global_dedup(mut self, enabled: bool) -> Self {
        self.enable_global_dedup = enabled;
        self
    }

    /// Enable download integrity verification
    pub fn with_verify_downloads(mut self) -> Self {
        self.verify_downloads = true;
        self
    }

    /// Set the in-flight request bound
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    /// The base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}
