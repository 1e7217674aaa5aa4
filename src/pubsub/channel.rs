//! Channel-key addressing: `service/version/endpoint`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Join the three address parts into a channel key.
///
/// Exact `/` join with no escaping; deployments on other stacks rely on this format.
pub fn channel_key(service: &str, version: &str, endpoint: &str) -> String {
    [service, version, endpoint].join("/")
}

/// The channel string did not split into exactly three parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel key `{0}`: expected service/version/endpoint")]
pub struct InvalidChannelKey(pub String);

/// A parsed `service/version/endpoint` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub service: String,
    pub version: String,
    pub endpoint: String,
}

impl ChannelKey {
    pub fn new(
        service: impl Into<String>,
        version: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&channel_key(&self.service, &self.version, &self.endpoint))
    }
}

impl FromStr for ChannelKey {
    type Err = InvalidChannelKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(version), Some(endpoint), None) => {
                Ok(ChannelKey::new(service, version, endpoint))
            }
            _ => Err(InvalidChannelKey(s.to_string())),
        }
    }
}
