//! Handshake configuration: where the identity provider lives and how long
//! to wait for it.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::HandshakeError;
use crate::origin::Origin;

/// Authorization endpoint of the default identity provider.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://identity.ic0.app/#authorize";

/// Fragment the provider page expects on the authorization URL.
pub const AUTHORIZE_FRAGMENT: &str = "authorize";

/// How long to wait for `authorize-ready` before aborting (5 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often the driver checks whether the user closed the provider window.
pub const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hosts allowed to serve the provider over plain http (local development).
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Configuration for a single-provider handshake.
///
/// The provider origin is derived from the authorization URL and is the
/// only origin messages are accepted from or sent to.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    authorize_url: Url,
    provider_origin: Origin,
    timeout: Duration,
}

impl HandshakeConfig {
    /// Build a config for the provider at `authorize_url`.
    ///
    /// The URL must be https (http is accepted for loopback hosts). A missing
    /// fragment defaults to `#authorize`.
    pub fn new(authorize_url: &str) -> Result<Self, HandshakeError> {
        let mut url = Url::parse(authorize_url)
            .map_err(|e| HandshakeError::InvalidConfig(format!("authorize URL: {}", e)))?;

        match url.scheme() {
            "https" => {}
            "http" if is_loopback(&url) => {}
            other => {
                return Err(HandshakeError::InvalidConfig(format!(
                    "authorize URL must use https, got {}",
                    other
                )))
            }
        }

        if url.fragment().map_or(true, str::is_empty) {
            url.set_fragment(Some(AUTHORIZE_FRAGMENT));
        }

        let provider_origin = Origin::from_url(&url)?;
        Ok(Self {
            authorize_url: url,
            provider_origin,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Replace the ready timeout. Zero is rejected.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HandshakeError> {
        if timeout.is_zero() {
            return Err(HandshakeError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    pub fn provider_origin(&self) -> &Origin {
        &self.provider_origin
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHORIZE_URL).expect("default authorize URL is valid")
    }
}

fn is_loopback(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| LOOPBACK_HOSTS.contains(&host))
}

/// Caller-supplied options, e.g. a plain JS object `{authorizeUrl, timeoutMs}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeOptions {
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl HandshakeOptions {
    /// Resolve options against the defaults.
    pub fn into_config(self) -> Result<HandshakeConfig, HandshakeError> {
        let config = match self.authorize_url {
            Some(url) => HandshakeConfig::new(&url)?,
            None => HandshakeConfig::default(),
        };
        match self.timeout_ms {
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => Ok(config),
        }
    }
}
