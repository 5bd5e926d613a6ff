// src/error.rs

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum DialError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Transport scheme not supported: {0}")]
  UnsupportedTransport(String),

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String), // Endpoint string, EADDRINUSE
  #[error("Address not available: {0}")]
  AddrNotAvailable(String), // Endpoint string, EADDRNOTAVAIL
  #[error("Permission denied for endpoint: {0}")]
  PermissionDenied(String), // EACCES, EPERM

  // --- Timeouts ---
  #[error("Connect attempt timed out")]
  Timeout, // ETIMEDOUT

  // --- Internal Errors ---
  #[error("Internal engine error: {0}")]
  Internal(String),
}

impl DialError {
  /// Maps common `std::io::Error` kinds to endpoint-aware variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => DialError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => DialError::AddrNotAvailable(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => DialError::PermissionDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => DialError::Timeout,
      _ => DialError::Io(e), // Default fallback
    }
  }

  /// The underlying OS error code, when one exists for this variant.
  pub fn errno(&self) -> Option<i32> {
    match self {
      DialError::Io(e) => e.raw_os_error(),
      DialError::AddrInUse(_) => Some(libc::EADDRINUSE),
      DialError::AddrNotAvailable(_) => Some(libc::EADDRNOTAVAIL),
      DialError::PermissionDenied(_) => Some(libc::EACCES),
      DialError::Timeout => Some(libc::ETIMEDOUT),
      _ => None,
    }
  }
}
