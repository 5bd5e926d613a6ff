// src/transport/mod.rs

pub mod endpoint;

pub use endpoint::{parse_endpoint, AddrFamily, Endpoint};

use crate::conn::connect;
use crate::engine::{ConnId, Engine};

/// Per-transport I/O operations table.
///
/// The connect state machine stays transport-agnostic: once a socket exists
/// (or, in batch mode, once the deferred creation pass has run), the engine
/// dispatches through this table. Alternate transports plug in by supplying
/// another implementation; the engine never inspects the concrete type.
pub trait ConnIo {
  /// Drives the OS connect attempt for `id` and advances its state machine.
  fn connect(&self, engine: &mut Engine, id: ConnId);
}

/// Default operations table for plain stream transports (TCP and, on Unix,
/// local stream sockets).
#[derive(Debug, Default)]
pub struct StreamIo;

impl ConnIo for StreamIo {
  fn connect(&self, engine: &mut Engine, id: ConnId) {
    connect::io_connect(engine, id);
  }
}
