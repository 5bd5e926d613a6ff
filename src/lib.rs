//! rdial - a non-blocking outbound-connection engine for event-driven
//! network servers.
//!
//! Given a target [`Endpoint`], an [`Engine`] drives socket creation, the
//! OS `connect()` attempt, write-readiness registration, timeout
//! supervision, and the post-writability `SO_ERROR` inspection to
//! completion, then dispatches exactly one terminal outcome (ready /
//! closed / error) to the caller-supplied [`WriteState`] handler set.
//!
//! One engine per worker thread; the engine is deliberately `!Send`, so
//! the single-threaded scheduling model is enforced by the type system.

pub mod conn;
pub mod engine;
pub mod error;
pub mod transport;

// Re-export core types for user convenience
pub use conn::{classify, ConnFlags, ConnHandler, ConnState, Connection, ErrorClass, Outcome, PlatformProfile, WriteState};
pub use engine::{ConnId, Engine, EngineConfig, QueueId, TimerKind};
pub use error::DialError;
pub use transport::{parse_endpoint, AddrFamily, ConnIo, Endpoint, StreamIo};
