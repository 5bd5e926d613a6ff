// src/engine/queue.rs

use crate::conn::Outcome;
use crate::engine::{ConnId, TimerKind};

use std::collections::VecDeque;

/// Named work queues, matching the concerns the engine keeps separate:
/// deferred socket creation, connect continuations, and per-connection
/// write-side work (readiness re-entry, timer expiry, terminal dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueId {
  Socket,
  Connect,
  Write,
}

/// One deferred call, carrying only the data its handler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Work {
  /// Batched socket creation for a queued connection-open request.
  CreateSocket(ConnId),
  /// Dispatch through the connection's I/O operations table.
  Connect(ConnId),
  /// Writability re-entry of the connect state machine.
  ConnectTest(ConnId),
  /// A connection timer reached its deadline.
  TimerExpired(ConnId, TimerKind),
  /// Exactly-once terminal dispatch to the write-state handler set.
  Terminal(ConnId, Outcome),
}

/// The engine's three FIFO queues. Order is strict within a queue; a drain
/// pass empties Socket, then Connect, then Write.
#[derive(Debug, Default)]
pub(crate) struct WorkQueues {
  socket: VecDeque<Work>,
  connect: VecDeque<Work>,
  write: VecDeque<Work>,
}

impl WorkQueues {
  pub(crate) fn push(&mut self, queue: QueueId, work: Work) {
    match queue {
      QueueId::Socket => self.socket.push_back(work),
      QueueId::Connect => self.connect.push_back(work),
      QueueId::Write => self.write.push_back(work),
    }
  }

  /// Next item in drain order. Socket work runs first so that a batch of
  /// open requests creates all its sockets as one unit before any connect
  /// continuation or terminal handler runs.
  pub(crate) fn pop_next(&mut self) -> Option<Work> {
    self
      .socket
      .pop_front()
      .or_else(|| self.connect.pop_front())
      .or_else(|| self.write.pop_front())
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.socket.is_empty() && self.connect.is_empty() && self.write.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fifo_within_a_queue() {
    let mut queues = WorkQueues::default();
    queues.push(QueueId::Write, Work::ConnectTest(ConnId(0)));
    queues.push(QueueId::Write, Work::ConnectTest(ConnId(1)));
    queues.push(QueueId::Write, Work::ConnectTest(ConnId(2)));

    assert_eq!(queues.pop_next(), Some(Work::ConnectTest(ConnId(0))));
    assert_eq!(queues.pop_next(), Some(Work::ConnectTest(ConnId(1))));
    assert_eq!(queues.pop_next(), Some(Work::ConnectTest(ConnId(2))));
    assert_eq!(queues.pop_next(), None);
  }

  #[test]
  fn socket_queue_drains_before_connect_and_write() {
    let mut queues = WorkQueues::default();
    queues.push(QueueId::Write, Work::ConnectTest(ConnId(9)));
    queues.push(QueueId::Connect, Work::Connect(ConnId(5)));
    queues.push(QueueId::Socket, Work::CreateSocket(ConnId(1)));
    queues.push(QueueId::Socket, Work::CreateSocket(ConnId(2)));

    assert_eq!(queues.pop_next(), Some(Work::CreateSocket(ConnId(1))));
    assert_eq!(queues.pop_next(), Some(Work::CreateSocket(ConnId(2))));
    assert_eq!(queues.pop_next(), Some(Work::Connect(ConnId(5))));
    assert_eq!(queues.pop_next(), Some(Work::ConnectTest(ConnId(9))));
    assert!(queues.is_empty());
  }
}
