// tests/common.rs
#![allow(dead_code)] // Not every helper is used by every test binary

use rdial::{ConnHandler, ConnId, Engine, WriteState};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

/// Installs a global fmt subscriber once. Overridable via RUST_LOG.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "rdial=trace,debug";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_test_writer()
      .init();
  });
}

/// Shared sink for asserting on emitted log lines.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
  pub fn contents(&self) -> String {
    String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
  }

  pub fn lines_containing(&self, needle: &str) -> usize {
    self.contents().lines().filter(|line| line.contains(needle)).count()
  }
}

impl io::Write for LogBuffer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> MakeWriter<'a> for LogBuffer {
  type Writer = LogBuffer;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}

/// Runs `f` with a capturing subscriber and returns what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, LogBuffer) {
  let buffer = LogBuffer::default();
  let subscriber = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_writer(buffer.clone())
    .with_ansi(false)
    .finish();
  let result = tracing::subscriber::with_default(subscriber, f);
  (result, buffer)
}

/// Ordered record of terminal handler invocations, e.g. `"ready:0"`.
pub type EventLog = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> EventLog {
  Rc::new(RefCell::new(Vec::new()))
}

pub fn record(log: &EventLog, tag: &'static str) -> ConnHandler {
  let log = Rc::clone(log);
  Rc::new(move |_engine: &mut Engine, id: ConnId| log.borrow_mut().push(format!("{tag}:{id}")))
}

/// A write-state descriptor whose three handlers append to `log`.
pub fn recording_state(log: &EventLog, autoreset: bool, timeout: Option<Duration>) -> Rc<WriteState> {
  Rc::new(WriteState {
    ready: record(log, "ready"),
    close: record(log, "close"),
    error: record(log, "error"),
    autoreset_timer: autoreset,
    timeout,
  })
}

/// Unique socket path so parallel tests do not collide.
pub fn unique_ipc_path() -> PathBuf {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  std::env::temp_dir().join(format!("rdial_test_{}_{}.sock", pid, count))
}

/// Drives the engine until `pred` holds, panicking after `max_wait`.
pub fn run_until(engine: &mut Engine, pred: impl Fn(&Engine) -> bool, max_wait: Duration) {
  let deadline = Instant::now() + max_wait;
  while !pred(engine) {
    assert!(Instant::now() < deadline, "engine condition not reached within {max_wait:?}");
    engine
      .run_once(Some(Duration::from_millis(20)))
      .expect("engine pass failed");
  }
}
