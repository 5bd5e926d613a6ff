// src/conn/classify.rs

use crate::transport::AddrFamily;

/// Outcome class for a failed connect attempt.
///
/// `Retry` means the peer is not currently accepting (routed to the close
/// handler so callers can try another address or back off); `Fatal` means
/// the network or configuration is broken (routed to the error handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Retry,
  Fatal,
}

/// Platform capabilities that bend error classification and socket setup.
///
/// Kept as data rather than scattered `cfg` branches so the policy is
/// documented in one place and testable on any host.
#[derive(Debug, Clone, Copy)]
pub struct PlatformProfile {
  /// Linux reports `EAGAIN` instead of `ECONNREFUSED` for local-domain
  /// sockets whose listen queue is full.
  pub eagain_means_backlog_full: bool,
  /// Solaris local-domain sockets do not support vectored sendfile.
  pub sendfile_on_unix_stream: bool,
}

impl PlatformProfile {
  /// The profile of the compilation target.
  pub fn host() -> Self {
    PlatformProfile {
      eagain_means_backlog_full: cfg!(target_os = "linux"),
      sendfile_on_unix_stream: !cfg!(target_os = "solaris"),
    }
  }
}

impl Default for PlatformProfile {
  fn default() -> Self {
    Self::host()
  }
}

/// Classifies a pending socket error observed for a connect attempt.
pub fn classify(profile: PlatformProfile, family: AddrFamily, errno: i32) -> ErrorClass {
  if errno == libc::ECONNREFUSED {
    return ErrorClass::Retry;
  }

  #[cfg(unix)]
  if errno == libc::EAGAIN && profile.eagain_means_backlog_full && family == AddrFamily::Unix {
    return ErrorClass::Retry;
  }
  #[cfg(not(unix))]
  let _ = (profile, family);

  ErrorClass::Fatal
}

/// Emits the one structured log line the terminal CLOSED/ERROR contract
/// requires: severity derived from the class, plus descriptor, peer text,
/// and the OS error code/message.
pub(crate) fn log_failure(class: ErrorClass, fd: i32, peer: &str, errno: i32) {
  let error = std::io::Error::from_raw_os_error(errno);
  match class {
    ErrorClass::Retry => tracing::info!(fd, peer = %peer, errno, error = %error, "connect failed"),
    ErrorClass::Fatal => tracing::error!(fd, peer = %peer, errno, error = %error, "connect failed"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn linux_profile() -> PlatformProfile {
    PlatformProfile {
      eagain_means_backlog_full: true,
      sendfile_on_unix_stream: true,
    }
  }

  fn bsd_profile() -> PlatformProfile {
    PlatformProfile {
      eagain_means_backlog_full: false,
      sendfile_on_unix_stream: true,
    }
  }

  #[test]
  fn refused_is_retry_on_every_profile() {
    for profile in [linux_profile(), bsd_profile()] {
      assert_eq!(classify(profile, AddrFamily::Inet, libc::ECONNREFUSED), ErrorClass::Retry);
      #[cfg(unix)]
      assert_eq!(classify(profile, AddrFamily::Unix, libc::ECONNREFUSED), ErrorClass::Retry);
    }
  }

  #[cfg(unix)]
  #[test]
  fn eagain_aliases_refusal_only_for_local_sockets_on_linux_profile() {
    assert_eq!(classify(linux_profile(), AddrFamily::Unix, libc::EAGAIN), ErrorClass::Retry);
    assert_eq!(classify(linux_profile(), AddrFamily::Inet, libc::EAGAIN), ErrorClass::Fatal);
    assert_eq!(classify(bsd_profile(), AddrFamily::Unix, libc::EAGAIN), ErrorClass::Fatal);
  }

  #[test]
  fn everything_else_is_fatal() {
    for errno in [libc::ENETUNREACH, libc::EHOSTUNREACH, libc::EACCES, libc::ETIMEDOUT] {
      assert_eq!(classify(linux_profile(), AddrFamily::Inet, errno), ErrorClass::Fatal);
    }
  }
}
