// src/conn/connect.rs
//
// The connect state machine: INIT -> SOCKET_READY -> CONNECTING ->
// {CONNECTED, CLOSED, ERROR}. All terminal dispatches go through the work
// queues, never as direct calls from a readiness or timer callback, so
// call depth stays bounded and per-connection ordering holds.

use crate::conn::classify::{classify, log_failure, ErrorClass};
use crate::conn::{ConnFlags, ConnState, Outcome};
use crate::engine::queue::Work;
use crate::engine::{ConnId, Engine, QueueId, TimerKind};
use crate::error::DialError;

use socket2::{Socket, Type};
use std::rc::Rc;

/// Admission point: defers socket creation through the Socket queue in
/// batch mode, otherwise creates the socket inline and dispatches the
/// transport's connect entry.
pub(crate) fn submit(engine: &mut Engine, id: ConnId) {
  if engine.batch() != 0 {
    engine.enqueue(QueueId::Socket, Work::CreateSocket(id));
    return;
  }

  match create_socket(engine, id) {
    Ok(()) => {
      let Some(conn) = engine.conn(id) else {
        return;
      };
      let io = Rc::clone(&conn.io);
      io.connect(engine, id);
    }
    Err(e) => fail_setup(engine, id, e, QueueId::Write),
  }
}

/// Deferred socket creation for one batched open request. The connect
/// continuation (or the setup failure) is forwarded through the Connect
/// queue, preserving submission order.
pub(crate) fn batch_socket(engine: &mut Engine, id: ConnId) {
  match create_socket(engine, id) {
    Ok(()) => engine.enqueue(QueueId::Connect, Work::Connect(id)),
    Err(e) => fail_setup(engine, id, e, QueueId::Connect),
  }
}

/// Creates the non-blocking socket and binds the local address when one
/// was requested. Atomic: a bind failure closes the fresh socket, so no
/// usable-looking but unbound descriptor survives.
fn create_socket(engine: &mut Engine, id: ConnId) -> Result<(), DialError> {
  let profile = engine.profile();
  let Some(conn) = engine.conn_mut(id) else {
    return Err(DialError::Internal(format!("unknown connection {id}")));
  };

  tracing::trace!(conn = %id, peer = %conn.remote.text(), "event conn socket");

  let sock = Socket::new(conn.remote.domain(), Type::STREAM, None)?;
  sock.set_nonblocking(true)?;

  let mut sendfile = true;
  #[cfg(unix)]
  if conn.remote.family() == crate::transport::AddrFamily::Unix && !profile.sendfile_on_unix_stream {
    sendfile = false;
  }
  #[cfg(not(unix))]
  let _ = profile;

  if let Some(local) = &conn.local {
    let addr = local.sock_addr()?;
    if let Err(e) = sock.bind(&addr) {
      // Dropping `sock` closes the freshly created descriptor.
      return Err(DialError::from_io_endpoint(e, local.text()));
    }
  }

  conn.flags.set(ConnFlags::SENDFILE, sendfile);
  conn.sock = Some(sock);
  conn.state = ConnState::SocketReady;
  Ok(())
}

/// Socket or bind failure short-circuits the state machine: the error
/// handler fires without the attempt ever reaching CONNECTING.
fn fail_setup(engine: &mut Engine, id: ConnId, err: DialError, queue: QueueId) {
  let errno = err.errno().unwrap_or(libc::EIO);
  {
    let Some(conn) = engine.conn_mut(id) else {
      return;
    };
    conn.last_error = Some(errno);
    conn.state = ConnState::Error;
    tracing::error!(conn = %id, peer = %conn.remote.text(), errno, error = %err, "connection setup failed");
  }
  engine.enqueue(queue, Work::Terminal(id, Outcome::Error));
}

/// The OS connect attempt, once the socket exists.
pub(crate) fn io_connect(engine: &mut Engine, id: ConnId) {
  let Some(conn) = engine.conn(id) else {
    return;
  };
  if conn.state() != ConnState::SocketReady {
    return;
  }
  let addr = conn.remote.sock_addr();

  let addr = match addr {
    Ok(addr) => addr,
    Err(e) => {
      settle(engine, id, Some(e.errno().unwrap_or(libc::EINVAL)));
      return;
    }
  };

  let result = match engine.conn(id).and_then(|c| c.sock.as_ref()) {
    Some(sock) => sock.connect(&addr),
    None => return,
  };

  match result {
    Ok(()) => settle(engine, id, None),

    Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
      if let Some(conn) = engine.conn_mut(id) {
        conn.state = ConnState::Connecting;
      }
      engine.arm_write_timer(id);
      engine.enable_write(id);
      tracing::trace!(conn = %id, "connect in progress");
    }

    // Immediate decline or failure: ECONNREFUSED (and, on Linux, EAGAIN
    // for a local-domain socket whose listen queue is full) classifies as
    // a close; anything else as an error.
    Err(e) => settle(engine, id, Some(e.raw_os_error().unwrap_or(libc::EIO))),
  }
}

/// Blocks write interest and applies the autoreset-timer policy before the
/// pending-error inspection. The writability test is one-shot; blocking
/// interest first is what makes the terminal dispatch exactly-once.
/// Returns false when the connection is not in CONNECTING.
pub(crate) fn write_test_prologue(engine: &mut Engine, id: ConnId) -> bool {
  let connecting = engine.conn(id).is_some_and(|c| c.state() == ConnState::Connecting);
  if !connecting {
    return false;
  }
  engine.block_write(id);

  let autoreset = engine
    .conn(id)
    .is_some_and(|c| c.write_state.autoreset_timer);
  if autoreset {
    engine.disable_timer(id, TimerKind::Write);
  }
  true
}

/// Writability re-entry: reads the socket's pending error state and
/// settles the attempt.
pub(crate) fn connect_test(engine: &mut Engine, id: ConnId) {
  if !write_test_prologue(engine, id) {
    return;
  }

  let pending = {
    let Some(conn) = engine.conn(id) else {
      return;
    };
    tracing::trace!(conn = %id, fd = conn.raw_fd().unwrap_or(-1), "event connect test");

    match conn.sock.as_ref().map(|s| s.take_error()) {
      Some(Ok(None)) => None,
      Some(Ok(Some(e))) => Some(e.raw_os_error().unwrap_or(libc::EIO)),
      // Platforms disagree on how getsockopt(SO_ERROR) itself fails;
      // normalize to the calling thread's error code before classifying.
      Some(Err(e)) => Some(e.raw_os_error().unwrap_or(libc::EIO)),
      None => return,
    }
  };

  settle(engine, id, pending);
}

/// Write-timer expiry while CONNECTING: routed through the same
/// classification and terminal path as any other pending error, which
/// preserves the exactly-once guarantee. Expiry in any other state is a
/// caller-managed timer and is ignored here.
pub(crate) fn timer_expired(engine: &mut Engine, id: ConnId, kind: TimerKind) {
  let state = engine.conn(id).map(|c| c.state());
  if kind != TimerKind::Write || state != Some(ConnState::Connecting) {
    tracing::trace!(conn = %id, ?kind, ?state, "timer expiry ignored");
    return;
  }
  engine.block_write(id);
  settle(engine, id, Some(libc::ETIMEDOUT));
}

/// Terminal transition for the attempt: no pending error means CONNECTED;
/// otherwise the classification table picks CLOSED or ERROR and the one
/// required log line is emitted. The handler itself runs later, from the
/// Write queue.
pub(crate) fn settle(engine: &mut Engine, id: ConnId, pending: Option<i32>) {
  let Some(errno) = pending else {
    {
      let Some(conn) = engine.conn_mut(id) else {
        return;
      };
      conn.flags.insert(ConnFlags::WRITE_READY);
      conn.state = ConnState::Connected;
      tracing::debug!(conn = %id, peer = %conn.remote.text(), "connected");
    }
    engine.enqueue(QueueId::Write, Work::Terminal(id, Outcome::Ready));
    return;
  };

  let profile = engine.profile();
  let outcome = {
    let Some(conn) = engine.conn_mut(id) else {
      return;
    };
    conn.last_error = Some(errno);
    let class = classify(profile, conn.remote.family(), errno);
    log_failure(class, conn.raw_fd().unwrap_or(-1), conn.remote.text(), errno);
    match class {
      ErrorClass::Retry => {
        conn.state = ConnState::Closed;
        Outcome::Close
      }
      ErrorClass::Fatal => {
        conn.state = ConnState::Error;
        Outcome::Error
      }
    }
  };
  engine.enqueue(QueueId::Write, Work::Terminal(id, outcome));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn::{ConnHandler, WriteState};
  use crate::engine::EngineConfig;
  use crate::transport::Endpoint;

  use std::cell::RefCell;
  use std::net::TcpListener;
  use std::time::Duration;

  fn record(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> ConnHandler {
    let log = Rc::clone(log);
    Rc::new(move |_engine: &mut Engine, _id: ConnId| log.borrow_mut().push(tag))
  }

  fn write_state(log: &Rc<RefCell<Vec<&'static str>>>, autoreset: bool) -> Rc<WriteState> {
    Rc::new(WriteState {
      ready: record(log, "ready"),
      close: record(log, "close"),
      error: record(log, "error"),
      autoreset_timer: autoreset,
      timeout: Some(Duration::from_secs(30)),
    })
  }

  #[test]
  fn write_timer_expiry_lands_in_error_handler_with_etimedout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let id = engine.connect(
      Endpoint::tcp(listener.local_addr().unwrap()),
      None,
      write_state(&log, true),
    );

    // Loopback non-blocking connect reports in-progress; keep the attempt
    // suspended by not polling readiness.
    assert_eq!(engine.conn(id).unwrap().state(), ConnState::Connecting);

    timer_expired(&mut engine, id, TimerKind::Write);
    engine.drain();

    assert_eq!(*log.borrow(), vec!["error"]);
    assert_eq!(engine.conn(id).unwrap().state(), ConnState::Error);
    assert_eq!(engine.conn(id).unwrap().last_error(), Some(libc::ETIMEDOUT));
    assert!(!engine.conn(id).unwrap().is_write_armed());
  }

  #[test]
  fn read_timer_expiry_does_not_touch_a_connecting_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let id = engine.connect(
      Endpoint::tcp(listener.local_addr().unwrap()),
      None,
      write_state(&log, true),
    );
    assert_eq!(engine.conn(id).unwrap().state(), ConnState::Connecting);

    timer_expired(&mut engine, id, TimerKind::Read);
    engine.drain();

    assert!(log.borrow().is_empty());
    assert_eq!(engine.conn(id).unwrap().state(), ConnState::Connecting);
  }

  #[test]
  fn write_test_is_a_noop_once_terminal() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let id = engine.connect(
      Endpoint::tcp(listener.local_addr().unwrap()),
      None,
      write_state(&log, true),
    );

    engine.complete_write_test(id, Some(libc::ECONNREFUSED));
    engine.drain();
    assert_eq!(*log.borrow(), vec!["close"]);

    // A late duplicate writability event must not produce a second
    // terminal dispatch.
    engine.complete_write_test(id, None);
    connect_test(&mut engine, id);
    engine.drain();
    assert_eq!(*log.borrow(), vec!["close"]);
  }
}
