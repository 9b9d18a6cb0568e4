use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Declarative TCP endpoint for listeners and outbound connections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port; `0` asks the operating system for an ephemeral port.
    pub port: u16,
}

impl Endpoint {
    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the endpoint to the first IPv4 or IPv6 socket address.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointResolveError`] when name resolution fails or yields
    /// no usable address.
    pub fn resolve(&self) -> Result<SocketAddr, EndpointResolveError> {
        let mut addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| EndpointResolveError::Lookup {
                endpoint: self.to_string(),
                source,
            })?;
        addrs.next().ok_or_else(|| EndpointResolveError::Empty {
                endpoint: self.to_string(),
            })
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        if url.scheme() != "tcp" {
            return Err(EndpointParseError::UnsupportedScheme(
                url.scheme().to_owned(),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
        let port = url
            .port()
            .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
        Ok(Self::tcp(host.trim_start_matches('[').trim_end_matches(']'), port))
    }
}

/// Errors encountered while parsing an [`Endpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not `tcp`.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// Port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised while resolving an [`Endpoint`] to a socket address.
#[derive(Debug, Error)]
pub enum EndpointResolveError {
    /// Name resolution failed.
    #[error("failed to resolve {endpoint}: {source}")]
    Lookup {
        /// Endpoint being resolved.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("no addresses resolved for {endpoint}")]
    Empty {
        /// Endpoint being resolved.
        endpoint: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_tcp_endpoint() {
        let endpoint = Endpoint::tcp("127.0.0.1", 5055);
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:5055");
    }

    #[test]
    fn parse_tcp_endpoint() {
        let endpoint: Endpoint = "tcp://localhost:9000".parse().expect("parse endpoint");
        assert_eq!(endpoint, Endpoint::tcp("localhost", 9000));
    }

    #[test]
    fn parse_rejects_other_schemes() {
        let error = "unix:///tmp/blue.sock"
            .parse::<Endpoint>()
            .expect_err("unix scheme should be rejected");
        assert!(matches!(error, EndpointParseError::UnsupportedScheme(_)));
    }

    #[test]
    fn parse_requires_port() {
        let error = "tcp://localhost"
            .parse::<Endpoint>()
            .expect_err("missing port should be rejected");
        assert!(matches!(error, EndpointParseError::MissingPort(_)));
    }

    #[test]
    fn resolves_loopback() {
        let addr = Endpoint::tcp("127.0.0.1", 0)
            .resolve()
            .expect("loopback resolves");
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn resolves_to_the_first_lookup_result() {
        let addr = Endpoint::tcp("::1", 5055)
            .resolve()
            .expect("ipv6 loopback resolves");
        assert_eq!(addr, "[::1]:5055".parse().expect("socket address"));
    }
}
