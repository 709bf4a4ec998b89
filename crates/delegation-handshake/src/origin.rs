//! Origins: the scheme + host + port triple that is the only trust boundary
//! between the relying page and the identity provider popup.

use std::fmt;

use url::Url;

use crate::error::HandshakeError;

/// An ASCII-serialized tuple origin, e.g. `https://identity.ic0.app`.
///
/// Default ports are omitted, matching what browsers report in
/// `MessageEvent.origin`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parse an origin from a URL or bare origin string.
    pub fn parse(input: &str) -> Result<Self, HandshakeError> {
        let url = Url::parse(input).map_err(|e| HandshakeError::InvalidOrigin(e.to_string()))?;
        Self::from_url(&url)
    }

    /// The origin of `url`. Opaque origins (`data:`, `file:`, ...) are rejected.
    pub fn from_url(url: &Url) -> Result<Self, HandshakeError> {
        match url.origin() {
            origin @ url::Origin::Tuple(..) => Ok(Self(origin.ascii_serialization())),
            url::Origin::Opaque(_) => Err(HandshakeError::InvalidOrigin(format!(
                "{} has an opaque origin",
                url.scheme()
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against a browser-reported origin.
    ///
    /// Browsers already serialize `MessageEvent.origin`, so no normalization
    /// is applied to `reported`; `"null"` never matches.
    pub fn matches(&self, reported: &str) -> bool {
        self.0 == reported
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path_and_fragment() {
        let origin = Origin::parse("https://identity.ic0.app/#authorize").unwrap();
        assert_eq!(origin.as_str(), "https://identity.ic0.app");
    }

    #[test]
    fn omits_default_port_keeps_custom_port() {
        assert_eq!(
            Origin::parse("https://identity.ic0.app:443/").unwrap().as_str(),
            "https://identity.ic0.app"
        );
        assert_eq!(
            Origin::parse("http://localhost:8080/authorize").unwrap().as_str(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn lowercases_host() {
        let origin = Origin::parse("https://Identity.IC0.app").unwrap();
        assert_eq!(origin.as_str(), "https://identity.ic0.app");
    }

    #[test]
    fn rejects_opaque_origins() {
        assert!(Origin::parse("data:text/plain,hello").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Origin::parse("not a url").is_err());
    }

    #[test]
    fn matches_is_exact() {
        let origin = Origin::parse("https://identity.ic0.app").unwrap();
        assert!(origin.matches("https://identity.ic0.app"));
        assert!(!origin.matches("https://identity.ic0.app.evil.example"));
        assert!(!origin.matches("http://identity.ic0.app"));
        assert!(!origin.matches("https://identity.ic0.app:8443"));
        assert!(!origin.matches("null"));
        assert!(!origin.matches(""));
    }

    #[test]
    fn display_is_serialization() {
        let origin = Origin::parse("https://identity.ic0.app/x").unwrap();
        assert_eq!(origin.to_string(), "https://identity.ic0.app");
    }
}
