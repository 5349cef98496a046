//! Client key generation and handling.

use crate::error::{RateKeeperError, Result};

/// Separator between client and resource in composite keys.
pub const KEY_SEPARATOR: char = '/';

/// Client position of a limit key that applies to every client of a resource.
pub const ANY_CLIENT: &str = "*";

/// A key that uniquely identifies a rate-limited subject.
///
/// The key is composed of the client identifier and, for two-dimensional
/// limits, the resource (endpoint, tier) the client is accessing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// The client identifier (user ID, API key, address)
    pub client: String,
    /// Optional resource scope
    pub resource: Option<String>,
}

impl ClientKey {
    /// Create a client-scoped key.
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            resource: None,
        }
    }

    /// Create a key scoped to one resource of a client.
    pub fn with_resource(client: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            resource: Some(resource.into()),
        }
    }

    /// Reject keys whose components are empty or could alias another key.
    ///
    /// Neither component may contain [`KEY_SEPARATOR`], and the client may
    /// not be [`ANY_CLIENT`].
    pub fn validate(&self) -> Result<()> {
        if self.client.is_empty() {
            return Err(RateKeeperError::InvalidKey("client must not be empty".into()));
        }
        if self.client == ANY_CLIENT {
            return Err(RateKeeperError::InvalidKey(format!(
                "client '{}' is reserved",
                ANY_CLIENT
            )));
        }
        if self.client.contains(KEY_SEPARATOR) {
            return Err(RateKeeperError::InvalidKey(format!(
                "client '{}' must not contain '{}'",
                self.client, KEY_SEPARATOR
            )));
        }
        match self.resource.as_deref() {
            Some("") => Err(RateKeeperError::InvalidKey(format!(
                "resource for client '{}' must not be empty",
                self.client
            ))),
            Some(resource) if resource.contains(KEY_SEPARATOR) => {
                Err(RateKeeperError::InvalidKey(format!(
                    "resource '{}' must not contain '{}'",
                    resource, KEY_SEPARATOR
                )))
            }
            _ => Ok(()),
        }
    }

    /// Convert the key to its registry string form.
    ///
    /// `client` for client-scoped keys, `client/resource` otherwise.
    pub fn to_string_key(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}{}{}", self.client, KEY_SEPARATOR, resource),
            None => self.client.clone(),
        }
    }

    /// Registry keys to consult for this subject, most specific first.
    ///
    /// Client-scoped keys look up `client` only. Resource-scoped keys look up
    /// `client/resource`, then the resource-wide `*/resource`.
    pub fn limit_candidates(&self) -> Vec<String> {
        match &self.resource {
            Some(resource) => vec![self.to_string_key(), resource_limit_key(resource)],
            None => vec![self.client.clone()],
        }
    }
}

/// Registry key of the limit shared by every client of `resource`.
pub fn resource_limit_key(resource: &str) -> String {
    format!("{}{}{}", ANY_CLIENT, KEY_SEPARATOR, resource)
}

/// Check the shape of a registry key: `client`, `client/resource` or
/// `*/resource`, with no empty parts.
pub(crate) fn validate_limit_key(key: &str) -> std::result::Result<(), &'static str> {
    if key.is_empty() {
        return Err("key must not be empty");
    }
    match key.split_once(KEY_SEPARATOR) {
        None if key == ANY_CLIENT => Err("a wildcard key needs a resource"),
        None => Ok(()),
        Some((client, resource)) => {
            if client.is_empty() || resource.is_empty() {
                Err("client and resource must not be empty")
            } else if resource.contains(KEY_SEPARATOR) {
                Err("key must contain at most one separator")
            } else {
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

impl From<&str> for ClientKey {
    fn from(client: &str) -> Self {
        ClientKey::new(client)
    }
}
