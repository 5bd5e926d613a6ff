// src/conn/mod.rs

pub mod classify;
pub(crate) mod connect;

pub use classify::{classify, ErrorClass, PlatformProfile};

use crate::engine::timer::TimerHandle;
use crate::engine::{ConnId, Engine};
use crate::transport::{ConnIo, Endpoint};

use bitflags::bitflags;
use socket2::Socket;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

/// A deferred call into the caller's protocol layer.
pub type ConnHandler = Rc<dyn Fn(&mut Engine, ConnId)>;

/// Terminal outcome of one connect attempt. Exactly one occurs per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Ready,
  Close,
  Error,
}

/// Connect state machine states. `Connected`, `Closed` and `Error` are
/// terminal for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
  Init,
  SocketReady,
  Connecting,
  Connected,
  Closed,
  Error,
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct ConnFlags: u8 {
    /// The descriptor is known writable.
    const WRITE_READY = 1 << 0;
    /// Write-readiness interest is currently registered with the poller.
    const WRITE_ARMED = 1 << 1;
    /// Vectored sendfile is usable on this descriptor.
    const SENDFILE = 1 << 2;
  }
}

/// Caller-supplied terminal handler set for one connect attempt.
///
/// The engine only reads it; reusing one descriptor across many
/// connections is expected. `timeout` bounds the CONNECTING wait (`None`
/// disables timeout supervision); `autoreset_timer` makes the engine
/// cancel the write timer itself once the writability test runs, instead
/// of leaving the armed timer to the caller.
pub struct WriteState {
  pub ready: ConnHandler,
  pub close: ConnHandler,
  pub error: ConnHandler,
  pub autoreset_timer: bool,
  pub timeout: Option<Duration>,
}

/// One in-flight or established outbound connection.
pub struct Connection {
  /// Owned descriptor; `None` until socket setup succeeds, then exclusive
  /// until close.
  pub(crate) sock: Option<Socket>,
  pub(crate) remote: Endpoint,
  pub(crate) local: Option<Endpoint>,
  pub(crate) state: ConnState,
  pub(crate) flags: ConnFlags,
  pub(crate) write_state: Rc<WriteState>,
  pub(crate) io: Rc<dyn ConnIo>,
  pub(crate) write_timer: TimerHandle,
  pub(crate) read_timer: TimerHandle,
  /// Last observed OS error code; set at most once per failed attempt.
  pub(crate) last_error: Option<i32>,
}

impl Connection {
  pub(crate) fn new(
    remote: Endpoint,
    local: Option<Endpoint>,
    write_state: Rc<WriteState>,
    io: Rc<dyn ConnIo>,
    write_timer: TimerHandle,
    read_timer: TimerHandle,
  ) -> Self {
    Connection {
      sock: None,
      remote,
      local,
      state: ConnState::Init,
      flags: ConnFlags::empty(),
      write_state,
      io,
      write_timer,
      read_timer,
      last_error: None,
    }
  }

  pub fn state(&self) -> ConnState {
    self.state
  }

  pub fn flags(&self) -> ConnFlags {
    self.flags
  }

  pub fn remote(&self) -> &Endpoint {
    &self.remote
  }

  pub fn last_error(&self) -> Option<i32> {
    self.last_error
  }

  pub fn is_write_ready(&self) -> bool {
    self.flags.contains(ConnFlags::WRITE_READY)
  }

  pub fn is_write_armed(&self) -> bool {
    self.flags.contains(ConnFlags::WRITE_ARMED)
  }

  pub fn sendfile_capable(&self) -> bool {
    self.flags.contains(ConnFlags::SENDFILE)
  }

  /// Raw descriptor, once the socket exists.
  pub fn raw_fd(&self) -> Option<i32> {
    self.sock.as_ref().map(|s| s.as_raw_fd())
  }

  /// Hands the established socket to the caller, consuming this record's
  /// ownership of the descriptor. Meaningful only after `Connected`.
  pub(crate) fn take_socket(&mut self) -> Option<Socket> {
    self.sock.take()
  }
}
