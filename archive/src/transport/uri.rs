//! Channel URIs of the form `aeron:<media>?key=value|key=value`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use super::TransportError;

pub const SCHEME: &str = "aeron";
pub const UDP_MEDIA: &str = "udp";
pub const ENDPOINT_KEY: &str = "endpoint";

/// Parsed channel string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUri {
    media: String,
    params: BTreeMap<String, String>,
}

fn invalid(channel: &str, reason: impl Into<String>) -> TransportError {
    TransportError::InvalidChannel {
        channel: channel.to_owned(),
        reason: reason.into(),
    }
}

impl ChannelUri {
    /// Parses `aeron:udp?endpoint=localhost:8010`.
    ///
    /// # Errors
    ///
    /// `InvalidChannel` for a missing scheme or media, or a parameter without `=`.
    pub fn parse(channel: &str) -> Result<Self, TransportError> {
        let rest = channel
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| invalid(channel, format!("must start with '{SCHEME}:'")))?;

        let (media, query) = match rest.split_once('?') {
            Some((media, query)) => (media, Some(query)),
            None => (rest, None),
        };
        if media.is_empty() {
            return Err(invalid(channel, "missing media"));
        }

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('|')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(channel, format!("parameter '{pair}' has no value")))?;
            params.insert(key.to_owned(), value.to_owned());
        }

        Ok(Self {
            media: media.to_owned(),
            params,
        })
    }

    #[must_use]
    pub fn media(&self) -> &str {
        &self.media
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Resolves the `endpoint` parameter of a UDP channel.
    ///
    /// # Errors
    ///
    /// `InvalidChannel` if the media is not UDP or the endpoint is missing or
    /// unresolvable.
    pub fn udp_endpoint(&self) -> Result<SocketAddr, TransportError> {
        let channel = self.to_string();
        if self.media != UDP_MEDIA {
            return Err(invalid(&channel, format!("media '{}' is not udp", self.media)));
        }
        let endpoint = self
            .get(ENDPOINT_KEY)
            .ok_or_else(|| invalid(&channel, "missing endpoint"))?;
        endpoint
            .to_socket_addrs()
            .map_err(|e| invalid(&channel, format!("cannot resolve '{endpoint}': {e}")))?
            .next()
            .ok_or_else(|| invalid(&channel, format!("'{endpoint}' resolved to nothing")))
    }
}

impl FromStr for ChannelUri {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChannelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}:{}", self.media)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '|' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}
