//! Host addresses
//!
//! Parsing and formatting for `name:port` / `[ipv6]:port` host syntax,
//! including comma-separated seed lists.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{ClientError, Result};

/// A cluster host address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub name: String,
    pub port: u16,
    /// Expected TLS certificate name, when the peers response carries one
    pub tls_name: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    pub fn with_tls_name(mut self, tls_name: impl Into<String>) -> Self {
        self.tls_name = Some(tls_name.into());
        self
    }

    /// Parse a single "name:port" or "[ipv6]:port" address
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let (name, port_str) = if let Some(rest) = s.strip_prefix('[') {
            // IPv6 addresses are bracketed
            let close = rest.find(']').ok_or_else(|| {
                ClientError::Config(format!("Unterminated bracket in host: {}", s))
            })?;
            let name = &rest[..close];
            let after = &rest[close + 1..];
            let port_str = after.strip_prefix(':').ok_or_else(|| {
                ClientError::Config(format!("Missing port in host: {}", s))
            })?;
            (name, port_str)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| ClientError::Config(format!("Missing port in host: {}", s)))?
        };

        if name.is_empty() {
            return Err(ClientError::Config(format!("Empty host name: {}", s)));
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| ClientError::Config(format!("Invalid port in host: {}", s)))?;

        Ok(Host::new(name, port))
    }

    /// Parse a comma-separated host list
    pub fn parse_list(s: &str) -> Result<Vec<Host>> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Host::parse)
            .collect()
    }

    /// Resolve to socket addresses
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.name.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                ClientError::Connection(format!("Failed to resolve {}: {}", self, e))
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ClientError::Connection(format!(
                "No addresses for {}",
                self
            )));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.contains(':') {
            write!(f, "[{}]:{}", self.name, self.port)
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}
