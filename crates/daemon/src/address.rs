// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client transport addresses (§6 "Client transport (addresses)", §8
//! boundary scenario 7).
//!
//! Parsed from `"pipe:<path>"` or `"tcp:<host>:<port>"`. The listener
//! and connection machinery this feeds is mentioned only as a transport
//! in §1 and is not otherwise in scope — `Address::listen` binds a
//! socket and nothing more; there is no RPC protocol layered over it
//! here.

use std::fmt;
use std::net::TcpListener;
use std::path::PathBuf;

use thiserror::Error;

#[cfg(unix)]
use std::os::unix::net::UnixListener;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unknown protocol in address {0:?}: {1:?}")]
    UnknownProtocol(String, String),

    #[error("missing host in address {0:?}")]
    MissingHost(String),

    #[error("missing port in address {0:?}")]
    MissingPort(String),

    #[error("invalid port {1:?} in address {0:?}")]
    InvalidPort(String, String),

    #[error("missing path in address {0:?}")]
    MissingPath(String),
}

/// A parsed client transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Pipe(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Address {
    /// Parse `"pipe:<path>"` or `"tcp:<host>:<port>"` (§6, §8 scenario 7).
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let mut split = s.splitn(2, ':');
        let protocol = split.next().unwrap_or("");
        let rest = split.next();
        match protocol {
            "pipe" => Self::parse_pipe(s, rest),
            "tcp" => Self::parse_tcp(s, rest),
            other => Err(AddressError::UnknownProtocol(s.to_string(), other.to_string())),
        }
    }

    fn parse_pipe(s: &str, rest: Option<&str>) -> Result<Self, AddressError> {
        match rest {
            None => Err(AddressError::MissingPath(s.to_string())),
            Some(path) if path.is_empty() => Err(AddressError::MissingPath(s.to_string())),
            Some(path) => Ok(Self::Pipe(PathBuf::from(path))),
        }
    }

    fn parse_tcp(s: &str, rest: Option<&str>) -> Result<Self, AddressError> {
        let rest = rest.ok_or_else(|| AddressError::MissingHost(s.to_string()))?;
        let mut hostport = rest.splitn(2, ':');
        let host = hostport.next().unwrap_or("");
        let port = hostport.next().ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(s.to_string(), port.to_string()))?;
        Ok(Self::Tcp { host: host.to_string(), port })
    }

    /// Bind a listener at this address. POSIX-only for `Pipe` (binds a
    /// UNIX stream socket and chmods it world-read/write per §6); `Tcp`
    /// binds INET with address reuse.
    pub fn listen(&self) -> std::io::Result<Listener> {
        match self {
            #[cfg(unix)]
            Self::Pipe(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
                Ok(Listener::Pipe(listener))
            }
            #[cfg(not(unix))]
            Self::Pipe(_path) => {
                Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "named pipes require a platform-specific listener"))
            }
            Self::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))?;
                Ok(Listener::Tcp(listener))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe(path) => write!(f, "pipe:{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// A bound listener, parallel to [`Address`]'s two variants.
pub enum Listener {
    #[cfg(unix)]
    Pipe(UnixListener),
    Tcp(TcpListener),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_with_host_and_port() {
        let addr = Address::parse("tcp:localhost:9999").unwrap();
        assert_eq!(addr, Address::Tcp { host: "localhost".to_string(), port: 9999 });
    }

    #[test]
    fn tcp_missing_host_is_an_error() {
        let err = Address::parse("tcp::9999").unwrap_err();
        assert!(matches!(err, AddressError::MissingHost(_)));
    }

    #[test]
    fn tcp_invalid_port_carries_bad_string() {
        let err = Address::parse("tcp:h:x").unwrap_err();
        assert_eq!(err, AddressError::InvalidPort("tcp:h:x".to_string(), "x".to_string()));
    }

    #[test]
    fn pipe_missing_path_is_an_error() {
        let err = Address::parse("pipe:").unwrap_err();
        assert!(matches!(err, AddressError::MissingPath(_)));
    }

    #[test]
    fn unknown_protocol_carries_the_scheme() {
        let err = Address::parse("ftp:/x").unwrap_err();
        assert_eq!(err, AddressError::UnknownProtocol("ftp:/x".to_string(), "ftp".to_string()));
    }

    #[test]
    fn pipe_with_path_round_trips_through_display() {
        let addr = Address::parse("pipe:/run/pdispatchd.sock").unwrap();
        assert_eq!(addr.to_string(), "pipe:/run/pdispatchd.sock");
        assert_eq!(Address::parse(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn tcp_round_trips_through_display() {
        let addr = Address::parse("tcp:localhost:9999").unwrap();
        assert_eq!(Address::parse(&addr.to_string()).unwrap(), addr);
    }

    #[cfg(unix)]
    #[test]
    fn listen_binds_a_unix_socket_world_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdispatchd.sock");
        let addr = Address::Pipe(path.clone());
        let _listener = addr.listen().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(mode.mode() & 0o777, 0o666);
    }
}
