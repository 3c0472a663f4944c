//! Device addresses: `host` or `host:port`.

use std::fmt;
use std::str::FromStr;

use super::error::ClientError;
use crate::config::DEFAULT_PORT;

/// Resolved `host:port` of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    /// Parse `host` or `host:port`, using `default_port` when none is given.
    ///
    /// Bracketed IPv6 literals (`[::1]:8888`) are accepted.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, ClientError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ClientError::InvalidAddress("empty address".to_string()));
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ClientError::InvalidAddress(input.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(input, port)?,
                None if tail.is_empty() => default_port,
                None => return Err(ClientError::InvalidAddress(input.to_string())),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match input.rsplit_once(':') {
            // a bare IPv6 literal has several colons and no port
            Some((host, _)) if host.contains(':') => Ok(Self {
                host: input.to_string(),
                port: default_port,
            }),
            Some((host, port)) if !host.is_empty() => Ok(Self {
                host: host.to_string(),
                port: parse_port(input, port)?,
            }),
            Some(_) => Err(ClientError::InvalidAddress(input.to_string())),
            None => Ok(Self {
                host: input.to_string(),
                port: default_port,
            }),
        }
    }

    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn connect_target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(input: &str, port: &str) -> Result<u16, ClientError> {
    port.parse()
        .map_err(|_| ClientError::InvalidAddress(format!("{}: bad port '{}'", input, port)))
}

impl FromStr for DeviceAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_PORT)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connect_target())
    }
}
