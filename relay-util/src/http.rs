//! Endpoint addresses for the HTTP and MQTT services the relay talks to

use std::fmt::{self, Display};
use std::str::FromStr;

use http::uri::{InvalidUri, InvalidUriParts, PathAndQuery};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Invalid URI: {0}")]
pub struct InvalidUriError(String);

impl From<InvalidUri> for InvalidUriError {
    fn from(value: InvalidUri) -> Self {
        InvalidUriError(value.to_string())
    }
}

impl From<InvalidUriParts> for InvalidUriError {
    fn from(value: InvalidUriParts) -> Self {
        InvalidUriError(value.to_string())
    }
}

/// An absolute URI, eg. `https://global.azure-devices-provisioning.net` or
/// `mqtt://127.0.0.1:1883`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri(http::Uri);

impl Uri {
    pub fn from_static(src: &'static str) -> Self {
        Self(http::Uri::from_static(src))
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host()
    }

    pub fn port(&self) -> Option<u16> {
        self.0.port_u16()
    }

    /// Address `path` (and `query`) on the same scheme and authority.
    /// Any path on `self` is replaced.
    pub fn join(&self, path: &str, query: Option<&str>) -> Result<Uri, InvalidUriError> {
        let path_and_query: PathAndQuery = match query {
            Some(query) => format!("{path}?{query}").parse()?,
            None => path.parse()?,
        };
        let mut parts = self.0.clone().into_parts();
        parts.path_and_query = Some(path_and_query);

        Ok(Self(http::Uri::from_parts(parts)?))
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Uri {
    type Err = InvalidUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
