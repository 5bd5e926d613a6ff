// src/engine/mod.rs

pub(crate) mod queue;
pub(crate) mod timer;

pub use queue::QueueId;
pub use timer::TimerKind;

use crate::conn::{connect, ConnFlags, ConnState, Connection, Outcome, PlatformProfile, WriteState};
use crate::error::DialError;
use crate::transport::{ConnIo, Endpoint, StreamIo};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use queue::{Work, WorkQueues};
use slab::Slab;
use socket2::Socket;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::{Duration, Instant};
use timer::{TimerHandle, TimerSet};

/// Identifies one connection inside its engine. Doubles as the poll token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) usize);

impl fmt::Display for ConnId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// When non-zero, connection-open requests defer socket creation through
  /// the Socket work queue so simultaneous opens amortize into one
  /// dispatch pass. Zero creates sockets inline.
  pub batch: usize,
  /// Capacity of the reusable poll event buffer.
  pub event_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      batch: 0,
      event_capacity: 256,
    }
  }
}

/// Per-thread scheduler: owns the readiness poller, the connection arena,
/// the named work queues, and the timer set.
///
/// One engine per worker thread; all callbacks for an engine run on its
/// owning thread, cooperatively. The `!Send` marker makes that invariant a
/// type-system fact rather than a convention.
pub struct Engine {
  poll: Poll,
  events: Events,
  conns: Slab<Connection>,
  queues: WorkQueues,
  timers: TimerSet,
  batch: usize,
  profile: PlatformProfile,
  _not_send: PhantomData<*const ()>,
}

impl Engine {
  pub fn new(config: EngineConfig) -> Result<Self, DialError> {
    Self::with_profile(config, PlatformProfile::host())
  }

  /// Builds an engine with an explicit platform profile. Tests use this to
  /// exercise foreign classification policies on any host.
  pub fn with_profile(config: EngineConfig, profile: PlatformProfile) -> Result<Self, DialError> {
    Ok(Engine {
      poll: Poll::new()?,
      events: Events::with_capacity(config.event_capacity.max(1)),
      conns: Slab::new(),
      queues: WorkQueues::default(),
      timers: TimerSet::default(),
      batch: config.batch,
      profile,
      _not_send: PhantomData,
    })
  }

  pub fn batch(&self) -> usize {
    self.batch
  }

  pub fn set_batch(&mut self, batch: usize) {
    self.batch = batch;
  }

  pub(crate) fn profile(&self) -> PlatformProfile {
    self.profile
  }

  // --- Connection admission ---

  /// Submits a connection-open request using the default stream transport.
  ///
  /// Never fails synchronously: setup errors reach the write-state error
  /// handler through the work queue, exactly once.
  pub fn connect(
    &mut self,
    remote: Endpoint,
    local: Option<Endpoint>,
    write_state: Rc<WriteState>,
  ) -> ConnId {
    self.connect_with(remote, local, write_state, Rc::new(StreamIo))
  }

  /// Same as [`Engine::connect`] with a caller-supplied I/O operations
  /// table.
  pub fn connect_with(
    &mut self,
    remote: Endpoint,
    local: Option<Endpoint>,
    write_state: Rc<WriteState>,
    io: Rc<dyn ConnIo>,
  ) -> ConnId {
    let id = ConnId(self.conns.vacant_entry().key());
    let write_timer = self.timers.register(id, TimerKind::Write);
    let read_timer = self.timers.register(id, TimerKind::Read);
    let key = self
      .conns
      .insert(Connection::new(remote, local, write_state, io, write_timer, read_timer));
    debug_assert_eq!(key, id.0);

    tracing::debug!(conn = %id, peer = %self.conns[id.0].remote().text(), batch = self.batch, "connect requested");
    connect::submit(self, id);
    id
  }

  /// Shared view of one connection.
  pub fn conn(&self, id: ConnId) -> Option<&Connection> {
    self.conns.get(id.0)
  }

  /// Hands the established socket to the caller. Returns `None` unless the
  /// attempt reached `Connected` (or the descriptor was already taken).
  pub fn take_socket(&mut self, id: ConnId) -> Option<Socket> {
    let conn = self.conns.get_mut(id.0)?;
    if conn.state() != ConnState::Connected {
      return None;
    }
    conn.take_socket()
  }

  /// Abandons a connection: disables its timers, drops readiness interest,
  /// closes the descriptor if still owned, and frees the id.
  pub fn close(&mut self, id: ConnId) {
    if !self.conns.contains(id.0) {
      return;
    }
    self.block_write(id);
    let conn = self.conns.remove(id.0);
    self.timers.release(conn.write_timer);
    self.timers.release(conn.read_timer);
    tracing::debug!(conn = %id, peer = %conn.remote().text(), "connection closed");
    // Dropping the record closes the descriptor.
  }

  // --- Work queues ---

  pub(crate) fn enqueue(&mut self, queue: QueueId, work: Work) {
    self.queues.push(queue, work);
  }

  // --- Readiness interest ---

  /// Registers write-readiness interest for the connection's descriptor.
  /// Idempotent.
  pub(crate) fn enable_write(&mut self, id: ConnId) {
    let Some(conn) = self.conns.get_mut(id.0) else {
      return;
    };
    if conn.flags.contains(ConnFlags::WRITE_ARMED) {
      return;
    }
    let Some(fd) = conn.raw_fd() else {
      return;
    };
    match self.poll.registry().register(&mut SourceFd(&fd), Token(id.0), Interest::WRITABLE) {
      Ok(()) => conn.flags.insert(ConnFlags::WRITE_ARMED),
      Err(e) => tracing::error!(conn = %id, fd, error = %e, "failed to register write interest"),
    }
  }

  /// Drops write-readiness interest. Idempotent.
  pub(crate) fn block_write(&mut self, id: ConnId) {
    let Some(conn) = self.conns.get_mut(id.0) else {
      return;
    };
    if !conn.flags.contains(ConnFlags::WRITE_ARMED) {
      return;
    }
    let Some(fd) = conn.raw_fd() else {
      return;
    };
    if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
      tracing::error!(conn = %id, fd, error = %e, "failed to deregister write interest");
    }
    conn.flags.remove(ConnFlags::WRITE_ARMED);
  }

  // --- Timers ---

  /// Arms one of the connection's timers. Re-arming supersedes the
  /// previous deadline.
  pub fn arm_timer(&mut self, id: ConnId, kind: TimerKind, deadline: Instant) {
    if let Some(handle) = self.timer_handle(id, kind) {
      self.timers.arm(handle, deadline);
    }
  }

  /// Disables a timer. A no-op if the timer is unarmed or already
  /// disabled.
  pub fn disable_timer(&mut self, id: ConnId, kind: TimerKind) {
    if let Some(handle) = self.timer_handle(id, kind) {
      self.timers.disable(handle);
    }
  }

  pub fn timer_armed(&self, id: ConnId, kind: TimerKind) -> bool {
    self
      .timer_handle(id, kind)
      .is_some_and(|handle| self.timers.is_armed(handle))
  }

  fn timer_handle(&self, id: ConnId, kind: TimerKind) -> Option<TimerHandle> {
    let conn = self.conns.get(id.0)?;
    Some(match kind {
      TimerKind::Write => conn.write_timer,
      TimerKind::Read => conn.read_timer,
    })
  }

  // --- Dispatch loop ---

  /// One scheduler pass: waits for readiness or timer expiry (bounded by
  /// `max_wait`), translates events into queued work, then drains the
  /// queues. Terminal handlers only ever run from the drain phase.
  pub fn run_once(&mut self, max_wait: Option<Duration>) -> Result<(), DialError> {
    let timeout = self.poll_timeout(max_wait);
    if let Err(e) = self.poll.poll(&mut self.events, timeout) {
      if e.kind() != io::ErrorKind::Interrupted {
        return Err(DialError::Io(e));
      }
    }

    let writable: Vec<usize> = self
      .events
      .iter()
      .filter(|ev| ev.is_writable() || ev.is_error() || ev.is_write_closed())
      .map(|ev| ev.token().0)
      .collect();
    for token in writable {
      let id = ConnId(token);
      let connecting = self
        .conns
        .get(token)
        .is_some_and(|c| c.state() == ConnState::Connecting);
      if connecting {
        self.queues.push(QueueId::Write, Work::ConnectTest(id));
      }
    }

    let now = Instant::now();
    while let Some((id, kind)) = self.timers.pop_expired(now) {
      self.queues.push(QueueId::Write, Work::TimerExpired(id, kind));
    }

    self.drain();
    Ok(())
  }

  /// Drains the work queues without polling. Batch dispatch and callers
  /// that only need queued continuations use this directly.
  pub fn drain(&mut self) {
    while let Some(work) = self.queues.pop_next() {
      self.dispatch(work);
    }
  }

  fn poll_timeout(&mut self, max_wait: Option<Duration>) -> Option<Duration> {
    if !self.queues.is_empty() {
      return Some(Duration::ZERO);
    }
    let until_deadline = self
      .timers
      .next_deadline()
      .map(|deadline| deadline.saturating_duration_since(Instant::now()));
    match (until_deadline, max_wait) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (Some(a), None) => Some(a),
      (None, b) => b,
    }
  }

  fn dispatch(&mut self, work: Work) {
    match work {
      Work::CreateSocket(id) => connect::batch_socket(self, id),
      Work::Connect(id) => {
        let Some(conn) = self.conns.get(id.0) else {
          return;
        };
        let io = Rc::clone(&conn.io);
        io.connect(self, id);
      }
      Work::ConnectTest(id) => connect::connect_test(self, id),
      Work::TimerExpired(id, kind) => connect::timer_expired(self, id, kind),
      Work::Terminal(id, outcome) => {
        let Some(conn) = self.conns.get(id.0) else {
          return;
        };
        let state = &conn.write_state;
        let handler = match outcome {
          Outcome::Ready => Rc::clone(&state.ready),
          Outcome::Close => Rc::clone(&state.close),
          Outcome::Error => Rc::clone(&state.error),
        };
        handler(self, id);
      }
    }
  }

  // --- State machine plumbing (crate-internal) ---

  pub(crate) fn conn_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
    self.conns.get_mut(id.0)
  }

  /// Arms the write timer from the write-state descriptor's timeout, if
  /// the caller asked for timeout supervision.
  pub(crate) fn arm_write_timer(&mut self, id: ConnId) {
    let Some(conn) = self.conns.get(id.0) else {
      return;
    };
    let Some(timeout) = conn.write_state.timeout else {
      return;
    };
    let handle = conn.write_timer;
    self.timers.arm(handle, Instant::now() + timeout);
  }

  /// Re-enters the connect state machine with an explicit pending-error
  /// observation, as the writability test would after polling `SO_ERROR`.
  ///
  /// This is the simulation seam for the state machine: harnesses inject
  /// `Some(errno)` or `None` here instead of forcing a kernel-reported
  /// socket error. A no-op unless the connection is `Connecting`.
  pub fn complete_write_test(&mut self, id: ConnId, pending: Option<i32>) {
    if !connect::write_test_prologue(self, id) {
      return;
    }
    connect::settle(self, id, pending);
  }
}

impl fmt::Debug for Engine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Engine")
      .field("connections", &self.conns.len())
      .field("batch", &self.batch)
      .field("profile", &self.profile)
      .finish_non_exhaustive()
  }
}
