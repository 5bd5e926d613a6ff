// src/transport/endpoint.rs

use crate::error::DialError;

use socket2::{Domain, SockAddr};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};

/// Address family of an endpoint, as the error-classification table sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
  Inet,
  #[cfg(unix)]
  Unix,
}

/// A parsed and validated target or bind address.
///
/// The original endpoint text is kept alongside the parsed form so that
/// log lines and errors can show exactly what the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Tcp(SocketAddr, String),
  #[cfg(unix)]
  Unix(PathBuf, String),
}

impl Endpoint {
  pub fn tcp(addr: SocketAddr) -> Self {
    let text = format!("tcp://{}", addr);
    Endpoint::Tcp(addr, text)
  }

  #[cfg(unix)]
  pub fn unix<P: AsRef<Path>>(path: P) -> Self {
    let path = path.as_ref().to_path_buf();
    let text = format!("ipc://{}", path.display());
    Endpoint::Unix(path, text)
  }

  /// The endpoint as the caller wrote it, for log lines.
  pub fn text(&self) -> &str {
    match self {
      Endpoint::Tcp(_, text) => text,
      #[cfg(unix)]
      Endpoint::Unix(_, text) => text,
    }
  }

  pub fn family(&self) -> AddrFamily {
    match self {
      Endpoint::Tcp(..) => AddrFamily::Inet,
      #[cfg(unix)]
      Endpoint::Unix(..) => AddrFamily::Unix,
    }
  }

  pub(crate) fn domain(&self) -> Domain {
    match self {
      Endpoint::Tcp(addr, _) => Domain::for_address(*addr),
      #[cfg(unix)]
      Endpoint::Unix(..) => Domain::UNIX,
    }
  }

  pub(crate) fn sock_addr(&self) -> Result<SockAddr, DialError> {
    match self {
      Endpoint::Tcp(addr, _) => Ok(SockAddr::from(*addr)),
      #[cfg(unix)]
      Endpoint::Unix(path, text) => {
        SockAddr::unix(path).map_err(|e| DialError::from_io_endpoint(e, text))
      }
    }
  }
}

/// Parses an endpoint string (`scheme://address`) into an [`Endpoint`].
pub fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, DialError> {
  let invalid_endpoint_err = || DialError::InvalidEndpoint(endpoint_str.to_string());

  let Some(separator_pos) = endpoint_str.find("://") else {
    return Err(invalid_endpoint_err());
  };
  let scheme = &endpoint_str[..separator_pos];
  let address_part = &endpoint_str[separator_pos + 3..];

  match scheme {
    "tcp" => address_part
      .parse::<SocketAddr>()
      .map(|addr| Endpoint::Tcp(addr, endpoint_str.to_string()))
      .map_err(|_| {
        tracing::debug!("Failed to parse TCP address: {}", address_part);
        invalid_endpoint_err()
      }),

    #[cfg(unix)]
    "ipc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Unix(PathBuf::from(address_part), endpoint_str.to_string()))
      }
    }

    // Unknown schemes, or schemes unavailable on this platform.
    _ => Err(DialError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
