//! Target endpoint of a trial.
//!
//! Only plain `http://` URIs are accepted. The readiness probe requests the
//! parsed URL, and the load generator receives the configured string
//! unchanged.

use reqwest::Url;
use std::fmt;
use std::str::FromStr;

use crate::error::SweepError;

/// A parsed `http://host[:port][/path]` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    raw: String,
    url: Url,
}

impl Endpoint {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Request path, always starting with `/`.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The URI exactly as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Endpoint {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| SweepError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason,
        };

        let url = Url::parse(s).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("only http:// endpoints are supported".to_string()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self {
            raw: s.to_string(),
            url,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
